use serde::Deserialize;

/// Top-level broker configuration.
///
/// Every section and key is optional in the loaded sources; whatever is
/// missing is filled in from the `Default` impls below, key by key, via
/// `serde(default)`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub transport: TransportSettings,
    pub crypto: CryptoSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Listener configuration.
///
/// `network` selects the socket family: `"tcp"` (addresses are host:port)
/// or `"unix"` (addresses are filesystem paths). The publish address is
/// also what gets advertised to clients inside AUTHENTICATE_ACK.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub network: String,
    pub command_addr: String,
    pub publish_addr: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            command_addr: "127.0.0.1:6571".to_string(),
            publish_addr: "127.0.0.1:6572".to_string(),
        }
    }
}

/// Broker key-pair file locations (PEM).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CryptoSettings {
    pub public_key_file: String,
    pub private_key_file: String,
}

impl Default for CryptoSettings {
    fn default() -> Self {
        Self {
            public_key_file: "kempub_public.pem".to_string(),
            private_key_file: "kempub_private.pem".to_string(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the sled database directory.
    pub db_file: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_file: "kempub.db".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, e.g. "info" or "debug".
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
