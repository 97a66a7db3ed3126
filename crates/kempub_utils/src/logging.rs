use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// The configured level becomes the default filter directive; a `RUST_LOG`
/// environment variable takes precedence so individual targets can be
/// turned up without touching the config file. Calling this twice is
/// harmless, later calls lose the `try_init` race and are ignored.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .try_init();
}
