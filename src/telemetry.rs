use std::sync::Once;

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::config::LogFormat;

static INIT: Once = Once::new();

fn build_env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Install the global subscriber once. `RUST_LOG` overrides the `info`
/// default; later calls are no-ops.
pub fn init(log_format: LogFormat) -> anyhow::Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        let env_filter = build_env_filter();
        result = match log_format {
            LogFormat::Text => tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_writer(std::io::stderr)
                        .compact()
                        .with_filter(env_filter),
                )
                .try_init(),
            LogFormat::Json => tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_writer(std::io::stderr)
                        .json()
                        .with_filter(env_filter),
                )
                .try_init(),
        }
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {}", e));
    });
    result
}
