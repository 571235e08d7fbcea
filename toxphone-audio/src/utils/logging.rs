use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "toxphone_audio=debug,warn";

/// Initialize logging with tracing
///
/// `RUST_LOG` wins when set, otherwise [`DEFAULT_FILTER`] applies. Events go
/// to stderr so stdout stays free for the loopback report. Calling it again
/// after a subscriber is installed is a no-op.
///
/// # Example
///
/// ```no_run
/// use toxphone_audio::utils::logging::init_logging;
///
/// init_logging();
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("toxphone-audio logging initialized");
    }
}
