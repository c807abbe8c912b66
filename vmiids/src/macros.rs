/// Logs a structured line with timestamp, level, component, pid, tid, and message.
/// Usage:
/// ```ignore
/// vmiids_log!(Level::Info, "orchestrator", "IDS started");
/// vmiids_log!(Level::Error, "monitor", "send failed: {}", err);
/// ```
/// Logs like:
/// [2025-04-25T16:32:10+02:00][DEBUG][monitor][pid=4568][tid=ThreadId(3)] Your message here
#[macro_export]
macro_rules! vmiids_log {
    ($level:expr, $component:expr, $fmt:expr $(, $($arg:tt)+)?) => {
        log::log!(
            $level,
            concat!(
                "[", "{}", "]",          // timestamp
                "[", "{}", "]",          // level via Display
                "[", $component, "]",    // component
                "[pid=", "{}", "]",      // pid
                "[tid=", "{:?}", "] ",   // tid
                $fmt                     // your message
            ),
            chrono::Local::now().to_rfc3339(),
            $level,
            std::process::id(),
            std::thread::current().id()
            $(, $($arg)+)?
        )
    };
}
