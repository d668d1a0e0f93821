//! Small filesystem helpers that don't belong to a specific storage
//! provider.
use std::path::Path;

/// Restrict a file to owner-only read/write where the underlying
/// filesystem supports POSIX permissions. A no-op on platforms without
/// `std::os::unix`, matching the data model's "where supported" wording
/// for secrets files.
#[cfg(unix)]
pub fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
