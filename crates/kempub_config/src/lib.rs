//! kempub_config
//!
//! Layered settings for the broker binary: an optional
//! `config/default.toml` under the working directory, overridden by
//! environment variables. Anything left unset falls back to the defaults
//! baked into the section types, so a bare `kempub server` runs without
//! any configuration at all.

pub mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::Settings;

pub use settings::{CryptoSettings, LoggingSettings, StorageSettings, TransportSettings};

pub fn load_config() -> Result<Settings, ConfigError> {
    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"))
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .expect("build config")
            .try_deserialize()
            .expect("deserialize settings")
    }

    #[test]
    fn partial_sources_fall_back_to_defaults() {
        // One section is incomplete, two are missing entirely.
        let settings = from_toml(
            r#"
            [transport]
            network = "unix"
            command_addr = "/run/kempub/cmd.sock"

            [logging]
            level = "debug"
            "#,
        );

        assert_eq!(settings.transport.network, "unix");
        assert_eq!(settings.transport.command_addr, "/run/kempub/cmd.sock");
        assert_eq!(settings.logging.level, "debug");

        // Unset keys keep their defaults, both inside a partially given
        // section and for sections absent from the source.
        assert_eq!(settings.transport.publish_addr, "127.0.0.1:6572");
        assert_eq!(settings.crypto.public_key_file, "kempub_public.pem");
        assert_eq!(settings.crypto.private_key_file, "kempub_private.pem");
        assert_eq!(settings.storage.db_file, "kempub.db");
    }

    #[test]
    fn empty_source_yields_all_defaults() {
        let settings = from_toml("");
        assert_eq!(settings.transport.network, "tcp");
        assert_eq!(settings.transport.command_addr, "127.0.0.1:6571");
        assert_eq!(settings.storage.db_file, "kempub.db");
        assert_eq!(settings.logging.level, "info");
    }
}
