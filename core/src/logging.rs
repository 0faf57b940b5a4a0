use tracing_subscriber::EnvFilter;

/// Installs a process-wide `tracing` subscriber. Safe to call more than
/// once (e.g. from multiple test modules); later calls are no-ops.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
