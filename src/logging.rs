use tracing::subscriber::set_global_default;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber, writing to stderr so the indexer's output
/// can be piped without log noise. Events carry their module target, which
/// tells embedder, store and indexer lines apart. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = fmt::layer()
        .pretty()
        .with_target(true)
        .with_level(true)
        .with_ansi(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);

    set_global_default(subscriber)?;
    Ok(())
}
