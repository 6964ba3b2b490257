use tracing_subscriber::EnvFilter;

/// Installs the JSON subscriber used by every entrypoint. `RUST_LOG`
/// overrides the default `info` filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}
