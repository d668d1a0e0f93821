//! Crate-wide defaults, mirroring the configuration options enumerated in
//! the host specification (`spec.md` §6).

/// Application name reported in startup logging.
pub const APP_NAME: &str = "pluginhost";

/// Crate version string reported in startup logging.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default subdirectory (under the host's working directory) for
/// per-plugin regular configuration files.
pub const CONFIG_DIR_NAME: &str = "config";

/// Default subdirectory for per-plugin secrets files.
pub const SECRETS_DIR_NAME: &str = "secrets";

/// Default subdirectory for the event bus's append-only persistence log.
pub const EVENTS_DIR_NAME: &str = "events";

/// Name of the event persistence log file within `EVENTS_DIR_NAME`.
pub const EVENTS_LOG_FILE: &str = "events.jsonl";

/// Supervisor: maximum restart attempts before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Supervisor: initial backoff before the first retry, in milliseconds.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 5_000;

/// Supervisor: backoff ceiling, in milliseconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;

/// Circuit breaker: consecutive failures before tripping open.
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 3;

/// Circuit breaker: time an open circuit blocks requests, in milliseconds.
pub const DEFAULT_CIRCUIT_TIMEOUT_MS: u64 = 30_000;

/// State observer: sampling interval, in milliseconds.
pub const DEFAULT_STATE_OBSERVER_INTERVAL_MS: u64 = 30_000;

/// Event bus: dead-letter queue capacity.
pub const DEFAULT_DLQ_MAX_SIZE: usize = 1_000;

/// Configuration store: poll interval, in milliseconds.
pub const DEFAULT_CONFIG_POLL_INTERVAL_MS: u64 = 2_000;

/// Configuration store: staleness window used to decide whether a
/// last-modified timestamp indicates a recent external edit, in milliseconds.
pub const DEFAULT_CONFIG_STALENESS_WINDOW_MS: u64 = 3_000;

/// Default port fallback for the (out-of-scope) REST collaborator,
/// retained here only because `spec.md` documents it as a core default.
pub const DEFAULT_PORT: u16 = 8080;
