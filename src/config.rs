//! Environment-driven client configuration.
//!
//! | Variable                      | Default                    |
//! |-------------------------------|----------------------------|
//! | `PLC_WORKER_SOCKET`           | [`default_socket_path`]    |
//! | `PLC_WASM_PATH`               | empty (engine's own path)  |
//! | `PLC_WORKER_DEBUG`            | off                        |
//! | `PLC_WORKER_SILENT`           | off                        |
//! | `PLC_WORKER_CONNECT_ATTEMPTS` | 5                          |

use std::path::PathBuf;

use tracing::warn;

use crate::protocol::EngineOptions;

pub const SOCKET_ENV: &str = "PLC_WORKER_SOCKET";
pub const WASM_PATH_ENV: &str = "PLC_WASM_PATH";
pub const DEBUG_ENV: &str = "PLC_WORKER_DEBUG";
pub const SILENT_ENV: &str = "PLC_WORKER_SILENT";
pub const CONNECT_ATTEMPTS_ENV: &str = "PLC_WORKER_CONNECT_ATTEMPTS";

const SOCKET_NAME: &str = "plc-worker.sock";
const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Get the default socket path for the engine host.
///
/// Uses `$XDG_RUNTIME_DIR/plc-worker.sock` when set, then the user cache
/// directory, then `/tmp/plc-worker.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(SOCKET_NAME);
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join(SOCKET_NAME);
    }

    PathBuf::from("/tmp").join(SOCKET_NAME)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub socket_path: PathBuf,
    /// Engine module path sent with `init`/`create`.
    pub engine_path: String,
    pub options: EngineOptions,
    pub connect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            engine_path: String::new(),
            options: EngineOptions::default(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(socket) = lookup(SOCKET_ENV).filter(|s| !s.is_empty()) {
            config.socket_path = PathBuf::from(socket);
        }
        if let Some(path) = lookup(WASM_PATH_ENV) {
            config.engine_path = path;
        }
        if let Some(value) = lookup(DEBUG_ENV) {
            config.options.debug = parse_flag(DEBUG_ENV, &value);
        }
        if let Some(value) = lookup(SILENT_ENV) {
            config.options.silent = parse_flag(SILENT_ENV, &value);
        }
        if let Some(value) = lookup(CONNECT_ATTEMPTS_ENV) {
            match value.trim().parse::<u32>() {
                Ok(n) if n > 0 => config.connect_attempts = n,
                _ => warn!("Ignoring invalid {}={:?}", CONNECT_ATTEMPTS_ENV, value),
            }
        }

        config
    }
}

/// `1`, `true`, `yes` and `on` (any case) are true; anything else is false.
fn parse_flag(name: &str, value: &str) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "" | "0" | "false" | "no" | "off" => false,
        other => {
            warn!("Treating {}={:?} as false", name, other);
            false
        }
    }
}
