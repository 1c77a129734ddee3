use std::{
    any::Any,
    backtrace::{Backtrace, BacktraceStatus},
    panic,
};

use tracing::*;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Filtering follows `RUST_LOG`.
pub fn init(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Routes panics through `tracing`, so a monitor task that panics is reported at `ERROR` in the same stream as
/// everything else.
pub fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        let thread = std::thread::current();
        let backtrace = Backtrace::capture();
        let backtrace =
            (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());
        let location = info.location();
        let message = panic_message(info.payload());

        error!(
            thread_name = thread.name().unwrap_or("<unnamed>"),
            panic.file = location.map(|l| l.file()),
            panic.line = location.map(|l| l.line()),
            panic.column = location.map(|l| l.column()),
            backtrace = backtrace.as_deref(),
            "panicked: {message}"
        );
    }));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "Box<dyn Any>"
    }
}
