use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over the config level;
/// logs go to stderr so stdout stays free for response frames.
pub fn init(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
