/// Fires a named lifecycle event down both the per-request `trace` callback
/// and `tracing`, if the `tracing` feature is enabled.
///
/// `trace_event!(extensions, "connection.connect_tcp.started")` or, with
/// key/value pairs forwarded to the callback as a small static map:
/// `trace_event!(extensions, "connection.connect_tcp.complete", "duration_ms" => elapsed)`.
macro_rules! trace_event {
    ($extensions:expr, $name:expr) => {
        trace_event!($extensions, $name,)
    };
    ($extensions:expr, $name:expr, $($key:expr => $value:expr),* $(,)?) => {{
        #[cfg(feature = "tracing")]
        tracing::debug!(event = $name, $($key = ?$value),*);
        if let Some(cb) = $extensions.trace.as_ref() {
            #[allow(unused_mut)]
            let mut kwargs: Vec<(&'static str, String)> = Vec::new();
            $(kwargs.push(($key, format!("{:?}", $value)));)*
            cb.call($name, &kwargs);
        }
    }};
}
