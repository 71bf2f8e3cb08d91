use tracing_subscriber::EnvFilter;

/// Logs go to stderr so `--output json` keeps stdout machine-readable. `RUST_LOG` wins over
/// `--log-level` when set.
pub(crate) fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
