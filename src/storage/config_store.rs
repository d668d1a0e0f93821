//! Per-plugin configuration and secrets on disk, with a polling loop
//! that detects external edits and notifies listeners, per §4.5.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::kernel::component::KernelComponent;
use crate::kernel::constants;
use crate::kernel::error::{Error, Result as KernelResult};
use crate::storage::error::StorageSystemError;
use crate::utils::fs::restrict_to_owner;

/// Per-plugin regular config and secrets, plus the on-disk last-modified
/// time the poller uses to detect external edits.
#[derive(Debug, Clone, Default)]
pub struct ConfigBundle {
    pub config: HashMap<String, String>,
    pub secrets: HashMap<String, String>,
    pub last_modified: Option<SystemTime>,
}

/// Sent to registered listeners when a plugin's config bundle changes on
/// disk. Per the redesign note in §9, this is a channel send rather than
/// a callback invoked while the poller holds any lock, so the receiver
/// (the Host/Registry) can call `reconcile_config` without re-entrant
/// locking.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub plugin_name: String,
    pub bundle: ConfigBundle,
}

#[derive(Debug, Clone, Copy)]
pub struct ConfigStoreConfig {
    pub poll_interval: Duration,
    pub staleness_window: Duration,
}

impl Default for ConfigStoreConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(constants::DEFAULT_CONFIG_POLL_INTERVAL_MS),
            staleness_window: Duration::from_millis(constants::DEFAULT_CONFIG_STALENESS_WINDOW_MS),
        }
    }
}

pub struct ConfigurationStore {
    config_dir: PathBuf,
    secrets_dir: PathBuf,
    config: ConfigStoreConfig,
    bundles: RwLock<HashMap<String, ConfigBundle>>,
    listeners: RwLock<Vec<mpsc::UnboundedSender<ConfigChange>>>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConfigurationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationStore")
            .field("config_dir", &self.config_dir)
            .field("secrets_dir", &self.secrets_dir)
            .finish_non_exhaustive()
    }
}

impl ConfigurationStore {
    pub fn new(base_dir: impl AsRef<Path>, config: ConfigStoreConfig) -> Self {
        let base_dir = base_dir.as_ref();
        Self {
            config_dir: base_dir.join(constants::CONFIG_DIR_NAME),
            secrets_dir: base_dir.join(constants::SECRETS_DIR_NAME),
            config,
            bundles: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            poll_handle: Mutex::new(None),
        }
    }

    fn config_path(&self, plugin_name: &str) -> PathBuf {
        self.config_dir.join(format!("{plugin_name}.json"))
    }

    fn secrets_path(&self, plugin_name: &str) -> PathBuf {
        self.secrets_dir.join(format!("{plugin_name}.json"))
    }

    /// Register a channel to receive [`ConfigChange`] notifications.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<ConfigChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.write().await.push(tx);
        rx
    }

    /// Load (or create empty) the bundle for a plugin and cache it.
    pub async fn load_bundle(&self, plugin_name: &str) -> KernelResult<ConfigBundle> {
        let config = read_json_map(&self.config_path(plugin_name)).await?;
        let secrets = read_json_map(&self.secrets_path(plugin_name)).await?;
        let last_modified = tokio::fs::metadata(self.config_path(plugin_name))
            .await
            .ok()
            .and_then(|m| m.modified().ok());

        let bundle = ConfigBundle {
            config,
            secrets,
            last_modified,
        };
        self.bundles.write().await.insert(plugin_name.to_string(), bundle.clone());
        Ok(bundle)
    }

    /// Currently cached bundle, if the plugin has been loaded before.
    pub async fn get_bundle(&self, plugin_name: &str) -> Option<ConfigBundle> {
        self.bundles.read().await.get(plugin_name).cloned()
    }

    pub async fn forget(&self, plugin_name: &str) {
        self.bundles.write().await.remove(plugin_name);
    }

    /// Overwrite a plugin's regular configuration on disk and in cache.
    pub async fn set_config(&self, plugin_name: &str, values: HashMap<String, String>) -> KernelResult<()> {
        write_json_map(&self.config_path(plugin_name), &values).await?;
        let mut bundles = self.bundles.write().await;
        let bundle = bundles.entry(plugin_name.to_string()).or_default();
        bundle.config = values;
        bundle.last_modified = Some(SystemTime::now());
        Ok(())
    }

    /// Overwrite a plugin's secrets on disk (owner-only permissions
    /// where supported) and in cache. Does not notify listeners: per
    /// §9, secrets changes do not trigger `reconcile_config`.
    pub async fn set_secrets(&self, plugin_name: &str, values: HashMap<String, String>) -> KernelResult<()> {
        let path = self.secrets_path(plugin_name);
        write_json_map(&path, &values).await?;
        if let Err(e) = restrict_to_owner(&path) {
            log::warn!("failed to restrict permissions on secrets file {}: {e}", path.display());
        }
        let mut bundles = self.bundles.write().await;
        bundles.entry(plugin_name.to_string()).or_default().secrets = values;
        Ok(())
    }

    async fn poll_once(&self) {
        let names: Vec<String> = self.bundles.read().await.keys().cloned().collect();
        for name in names {
            let path = self.config_path(&name);
            let Ok(metadata) = tokio::fs::metadata(&path).await else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };

            let previous_modified = self.bundles.read().await.get(&name).and_then(|b| b.last_modified);
            let changed = match previous_modified {
                Some(prev) => modified > prev,
                None => true,
            };
            if !changed {
                continue;
            }
            let age = SystemTime::now().duration_since(modified).unwrap_or_default();
            if age < self.config.staleness_window {
                // Still within the staleness window; wait for the file
                // to settle before acting on it.
                continue;
            }

            match read_json_map(&path).await {
                Ok(values) => {
                    let bundle = {
                        let mut bundles = self.bundles.write().await;
                        let bundle = bundles.entry(name.clone()).or_default();
                        bundle.config = values;
                        bundle.last_modified = Some(modified);
                        bundle.clone()
                    };
                    let listeners = self.listeners.read().await;
                    for tx in listeners.iter() {
                        let _ = tx.send(ConfigChange {
                            plugin_name: name.clone(),
                            bundle: bundle.clone(),
                        });
                    }
                }
                Err(e) => {
                    log::warn!("configuration fault reloading '{name}' from {}: {e}", path.display());
                }
            }
        }
    }
}

/// Reads a top-level JSON object and coerces every value to a string, per
/// §4.5: string values are kept verbatim, anything else (numbers, bools,
/// arrays, objects, null) is encoded as its JSON representation. Without
/// this coercion a perfectly ordinary operator-edited file like
/// `{"port": 8080, "debug": true}` would fail to parse as a string map at
/// all.
async fn read_json_map(path: &Path) -> KernelResult<HashMap<String, String>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(Error::io(e, "read", path.to_path_buf())),
    };

    let raw: HashMap<String, serde_json::Value> = serde_json::from_str(&contents).map_err(|source| {
        Error::StorageSystem(StorageSystemError::ConfigurationFault {
            scope: path.display().to_string(),
            path: path.to_path_buf(),
            message: "failed to parse configuration as a JSON object".to_string(),
            source: Some(Box::new(source)),
        })
    })?;

    Ok(raw.into_iter().map(|(key, value)| (key, coerce_to_string(value))).collect())
}

/// String values pass through untouched; every other JSON value is
/// encoded as its JSON representation (`8080` -> `"8080"`, `true` ->
/// `"true"`, `null` -> `"null"`, objects/arrays as their compact JSON).
fn coerce_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

async fn write_json_map(path: &Path, values: &HashMap<String, String>) -> KernelResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(e, "create_dir_all", parent.to_path_buf()))?;
    }
    let contents = serde_json::to_string_pretty(values).map_err(|source| {
        Error::StorageSystem(StorageSystemError::SerializationError {
            format: "json".to_string(),
            source: Box::new(source),
        })
    })?;
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| Error::io(e, "write", path.to_path_buf()))
}

#[async_trait]
impl KernelComponent for ConfigurationStore {
    fn name(&self) -> &'static str {
        "ConfigurationStore"
    }

    async fn initialize(&self) -> KernelResult<()> {
        tokio::fs::create_dir_all(&self.config_dir)
            .await
            .map_err(|e| Error::io(e, "create_dir_all", self.config_dir.clone()))?;
        tokio::fs::create_dir_all(&self.secrets_dir)
            .await
            .map_err(|e| Error::io(e, "create_dir_all", self.secrets_dir.clone()))?;
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        // The poller needs `&'static self` in practice; `Host` owns this
        // component behind an `Arc` and spawns the loop there. See
        // `kernel::host::Host::start` for the actual spawn.
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        if let Some(handle) = self.poll_handle.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

impl ConfigurationStore {
    /// Spawn the polling loop. Takes `self` behind an `Arc` since the
    /// loop outlives the call that starts it; called by `Host::start`
    /// once the store is wrapped.
    pub async fn spawn_poller(self: &std::sync::Arc<Self>) {
        let this = std::sync::Arc::clone(self);
        let interval = self.config.poll_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.poll_once().await;
            }
        });
        *self.poll_handle.lock().await = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn non_string_json_values_are_coerced_to_their_json_representation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigurationStore::new(dir.path(), ConfigStoreConfig::default());
        store.initialize().await.expect("initialize");

        tokio::fs::write(
            store.config_path("p1"),
            r#"{"port": 8080, "debug": true, "label": "ok", "tags": ["a", "b"], "limit": null}"#,
        )
        .await
        .expect("write raw config");

        let bundle = store.load_bundle("p1").await.expect("load_bundle");
        assert_eq!(bundle.config.get("port"), Some(&"8080".to_string()));
        assert_eq!(bundle.config.get("debug"), Some(&"true".to_string()));
        assert_eq!(bundle.config.get("label"), Some(&"ok".to_string()));
        assert_eq!(bundle.config.get("tags"), Some(&"[\"a\",\"b\"]".to_string()));
        assert_eq!(bundle.config.get("limit"), Some(&"null".to_string()));
    }

    #[tokio::test]
    async fn set_and_load_config_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigurationStore::new(dir.path(), ConfigStoreConfig::default());
        store.initialize().await.expect("initialize");

        let mut values = HashMap::new();
        values.insert("level".to_string(), "debug".to_string());
        store.set_config("p1", values.clone()).await.expect("set_config");

        let bundle = store.load_bundle("p1").await.expect("load_bundle");
        assert_eq!(bundle.config.get("level"), Some(&"debug".to_string()));
    }

    #[tokio::test]
    async fn secrets_written_with_owner_only_permissions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigurationStore::new(dir.path(), ConfigStoreConfig::default());
        store.initialize().await.expect("initialize");

        let mut values = HashMap::new();
        values.insert("token".to_string(), "shh".to_string());
        store.set_secrets("p1", values).await.expect("set_secrets");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let path = dir.path().join(constants::SECRETS_DIR_NAME).join("p1.json");
            let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn poll_detects_external_edit_after_staleness_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ConfigurationStore::new(
            dir.path(),
            ConfigStoreConfig {
                poll_interval: Duration::from_millis(10),
                staleness_window: Duration::from_millis(0),
            },
        ));
        store.initialize().await.expect("initialize");
        store.load_bundle("p1").await.expect("load_bundle");
        let mut rx = store.subscribe().await;

        let mut values = HashMap::new();
        values.insert("level".to_string(), "info".to_string());
        store.set_config("p1", values).await.expect("direct set_config");

        // Simulate an external edit by writing directly, bypassing the
        // cache update `set_config` performs.
        let mut external = HashMap::new();
        external.insert("level".to_string(), "trace".to_string());
        tokio::time::sleep(Duration::from_millis(5)).await;
        write_json_map(&store.config_path("p1"), &external).await.expect("write external");

        store.spawn_poller().await;
        let change = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("poll should notice the change")
            .expect("channel open");
        assert_eq!(change.plugin_name, "p1");
        assert_eq!(change.bundle.config.get("level"), Some(&"trace".to_string()));
    }

    #[tokio::test]
    async fn poll_defers_reload_while_edit_is_within_staleness_window() {
        // Isolates the debounce reading from `poll_detects_external_edit_after_staleness_window`
        // above, whose staleness_window of 0ms never actually exercises
        // the `age < staleness_window` branch. Here the window is wide
        // enough that an edit must sit unread through several poll ticks
        // before it is picked up.
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ConfigurationStore::new(
            dir.path(),
            ConfigStoreConfig {
                poll_interval: Duration::from_millis(10),
                staleness_window: Duration::from_millis(150),
            },
        ));
        store.initialize().await.expect("initialize");
        store.load_bundle("p1").await.expect("load_bundle");
        let mut rx = store.subscribe().await;

        let mut external = HashMap::new();
        external.insert("level".to_string(), "trace".to_string());
        write_json_map(&store.config_path("p1"), &external).await.expect("write external");

        store.spawn_poller().await;

        let early = tokio::time::timeout(Duration::from_millis(60), rx.recv()).await;
        assert!(early.is_err(), "an edit still inside the staleness window must not be reloaded yet");

        let change = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("poll should notice the change once the staleness window elapses")
            .expect("channel open");
        assert_eq!(change.bundle.config.get("level"), Some(&"trace".to_string()));
    }
}
