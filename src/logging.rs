//! Optional `tracing` subscriber for binaries embedding the engine.

use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber.
///
/// `RUST_LOG` takes precedence when set; otherwise the verbosity selects the
/// level for this crate: `0` warn, `1` info, `2` and above debug.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbosity {
        0 => EnvFilter::new("taskstamp=warn"),
        1 => EnvFilter::new("taskstamp=info"),
        _ => EnvFilter::new("taskstamp=debug"),
    });

    // A subscriber installed by the host application wins.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
