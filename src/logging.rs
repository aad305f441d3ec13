//! Logging and tracing infrastructure for dlscope.
//!
//! Structured events go through the tracing crate. User-facing diagnostics
//! (unresolved replacements, rebinding advice) additionally pass through a
//! single overridable hook so embedding tools can redirect or silence them.

use once_cell::sync::Lazy;
use std::sync::{Once, RwLock};
use tracing::{info, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

/// Signature of a diagnostic hook.
pub type Logger = Box<dyn Fn(&str) + Send + Sync>;

static LOGGER: Lazy<RwLock<Option<Logger>>> = Lazy::new(|| RwLock::new(None));

/// Initialize the global tracing subscriber.
///
/// This should be called once at program startup.
/// Subsequent calls are ignored.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        // try_init: a host application may already own the global subscriber
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();

        info!("dlscope tracing initialized");
    });
}

/// Initialize tracing with JSON output for structured logging.
pub fn init_tracing_json() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true);

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();

        info!("dlscope tracing initialized (JSON mode)");
    });
}

/// Replace the diagnostic hook.
pub fn set_logger<F>(logger: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    if let Ok(mut slot) = LOGGER.write() {
        *slot = Some(Box::new(logger));
    }
}

/// Restore the default hook, which forwards to `tracing::warn!`.
pub fn reset_logger() {
    if let Ok(mut slot) = LOGGER.write() {
        *slot = None;
    }
}

/// Emit a user-facing diagnostic through the current hook.
pub fn diagnostic(message: &str) {
    if let Ok(slot) = LOGGER.read() {
        if let Some(logger) = slot.as_ref() {
            logger(message);
            return;
        }
    }
    warn!(target: "dlscope", "{}", message);
}

/// Macro for creating spans around image-level work
#[macro_export]
macro_rules! span_trace {
    ($name:expr) => {
        tracing::debug_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::debug_span!($name, $($field)*)
    };
}
