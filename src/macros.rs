/// Wrap a [crate::handler::Handler] in any number of [crate::handler::Middleware], outermost
/// first. `compose_handler!(h, a, b)` runs `a`, then `b`, then `h`.
///
/// ```
/// use keel::prelude::*;
///
/// let passthrough = Middleware::new(|next: Handler| next);
/// let handler = compose_handler!(
///     Handler::new(|ctx: Context| async move { ctx.text(StatusCode::OK, "pong") }),
///     passthrough.clone(),
///     passthrough,
/// );
/// # drop(handler);
/// ```
#[macro_export]
macro_rules! compose_handler {
    ($handler:expr $(,)?) => {
        $handler
    };
    ($handler:expr, $($middleware:expr),+ $(,)?) => {
        $crate::handler::compose($handler, &[$($middleware),+])
    };
}

// Logging goes to whichever of the `trace` (tracing) and `logging` (log) features are enabled.

macro_rules! log_event {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "trace")]
        tracing::$level!($($arg)*);
        #[cfg(feature = "logging")]
        log::$level!($($arg)*);
        #[cfg(not(any(feature = "trace", feature = "logging")))]
        {
            let _ = format!($($arg)*);
        }
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => { log_event!(debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { log_event!(info, $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { log_event!(warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { log_event!(error, $($arg)*) };
}
