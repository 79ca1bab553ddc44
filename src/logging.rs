use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// Log to `stdout`, filtered by `RUST_LOG` with "info" as the default level.
pub fn init_subscriber() {
    let fmt_layer = fmt::layer().with_target(true).with_thread_names(true);

    let filter_layer = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

/// Subscriber for tests, installed only for the calling thread while the guard lives.
pub fn init_test_subscriber() -> tracing::subscriber::DefaultGuard {
    let fmt_layer = fmt::layer().with_target(true).with_test_writer();

    let filter_layer = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .set_default()
}
