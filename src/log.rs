//! # Logging.

use crate::context::Context;

#[macro_export]
macro_rules! info {
    ($ctx:expr,  $msg:expr) => {
        info!($ctx, $msg,)
    };
    ($ctx:expr, $msg:expr, $($args:expr),* $(,)?) => {{
        let formatted = format!($msg, $($args),*);
        let full = format!("{file}:{line}: {msg}",
                           file = file!(),
                           line = line!(),
                           msg = &formatted);
        emit_event!($ctx, $crate::EventType::Info(full));
    }};
}

#[macro_export]
macro_rules! warn {
    ($ctx:expr, $msg:expr) => {
        warn!($ctx, $msg,)
    };
    ($ctx:expr, $msg:expr, $($args:expr),* $(,)?) => {{
        let formatted = format!($msg, $($args),*);
        let full = format!("{file}:{line}: {msg}",
                           file = file!(),
                           line = line!(),
                           msg = &formatted);
        emit_event!($ctx, $crate::EventType::Warning(full));
    }};
}

#[macro_export]
macro_rules! emit_event {
    ($ctx:expr, $event:expr) => {
        $ctx.emit_event($event);
    };
}

/// Extension for results which should not abort the caller on error.
pub trait LogExt<T> {
    /// Emits a warning if the receiver contained an Err value.
    ///
    /// Returns an [`Option<T>`] with the `Ok(_)` value, if any.
    ///
    /// Thanks to `#[track_caller]` the location of the caller is printed
    /// to the log, just like with the `warn!()` macro.
    #[track_caller]
    fn log(self, context: &Context) -> Option<T>;
}

impl<T> LogExt<T> for anyhow::Result<T> {
    #[track_caller]
    fn log(self, context: &Context) -> Option<T> {
        match self {
            Err(e) => {
                let location = std::panic::Location::caller();
                // We are using Anyhow's .context() and to show the inner error, too, we need the {:#}:
                let full = format!(
                    "{file}:{line}: {e:#}",
                    file = location.file(),
                    line = location.line(),
                    e = e
                );
                // We can't use the warn!() macro here as the file!() and line!() macros
                // don't work well with #[track_caller]
                emit_event!(context, crate::EventType::Warning(full));
                None
            }
            Ok(v) => Some(v),
        }
    }
}
