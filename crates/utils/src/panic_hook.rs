use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

fn payload_str<'a>(panic_info: &'a PanicHookInfo<'_>) -> Option<&'a str> {
    let payload = panic_info.payload();
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

/// Report panics through `tracing`, or on stderr when errors are not being recorded.
pub fn tracing_panic_hook(panic_info: &PanicHookInfo) {
    let payload = payload_str(panic_info);
    let location = panic_info.location().map(ToString::to_string);
    let current = std::thread::current();
    let thread = current.name().unwrap_or("<unnamed>");
    let backtrace = Some(Backtrace::capture())
        .filter(|backtrace| backtrace.status() == BacktraceStatus::Captured);

    if tracing::enabled!(tracing::Level::ERROR) {
        if let Some(backtrace) = backtrace {
            tracing::error!(
                panic.payload = payload,
                panic.location = location,
                panic.thread = thread,
                "A panic occurred: {backtrace}"
            );
        } else {
            tracing::error!(
                panic.payload = payload,
                panic.location = location,
                panic.thread = thread,
                "A panic occurred",
            );
        }
    } else {
        eprintln!(
            "A panic occurred in thread `{thread}`: {}",
            payload.unwrap_or("<non-string payload>")
        );
        if let Some(location) = location {
            eprintln!("  at {location}");
        }
        if let Some(backtrace) = backtrace {
            eprintln!("{backtrace}");
        }
    }
}
