use anyhow::Result;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

static TELEMETRY: OnceLock<()> = OnceLock::new();

/// Install the global tracing subscriber, reading the filter from
/// `RUST_LOG` and defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops, so the binary and
/// unit tests can both initialize freely.
pub fn init_tracing() -> Result<()> {
    if TELEMETRY.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    TELEMETRY.set(()).ok();

    Ok(())
}
