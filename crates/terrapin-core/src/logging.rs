//! Logging integration for terrapin.
//!
//! Provides a helper for installing a [`tracing`] subscriber and the span
//! used to group the statements executed on one connection.

/// Sets up the global tracing subscriber.
///
/// `level` is an [`EnvFilter`](tracing_subscriber::EnvFilter) directive such
/// as `"info"` or `"terrapin_db=debug"`. When `json` is false a pretty,
/// human-readable format is used; otherwise events are emitted as JSON.
/// Installing a second subscriber is a no-op.
pub fn setup_logging(level: &str, json: bool) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for statements executed on a connection.
///
/// # Examples
///
/// ```
/// use terrapin_core::logging::query_span;
///
/// let span = query_span("default");
/// let _guard = span.enter();
/// tracing::debug!(sql = "SELECT 1", "executing");
/// ```
pub fn query_span(connection: &str) -> tracing::Span {
    tracing::debug_span!("db_client", connection = connection)
}
