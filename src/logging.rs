use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `OVLSTORE_LOG` (default `info`).
///
/// Does nothing if the host already installed a global subscriber.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("OVLSTORE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already installed");
    }
}
