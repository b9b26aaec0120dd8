//! Structured logging setup.

/// Install a `tracing` subscriber filtered by `RUST_LOG`, unless the host
/// application already installed one.
///
/// Pools log admissions and failures under their `pool` field; the wheel logs
/// under `timer_id`. `RUST_LOG=ingest_runtime=debug` shows both.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}
