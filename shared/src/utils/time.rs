//! Time-related utilities

/// Duration between two runtime timestamps, `None` if `end` precedes `start`
pub fn duration_ns(start: u64, end: u64) -> Option<u64> {
    end.checked_sub(start)
}

/// Format a nanosecond duration with the largest unit that keeps it readable
pub fn format_duration_ns(ns: u64) -> String {
    if ns >= 1_000_000_000 {
        format!("{:.3}s", ns as f64 / 1e9)
    } else if ns >= 1_000_000 {
        format!("{:.3}ms", ns as f64 / 1e6)
    } else if ns >= 1_000 {
        format!("{:.3}us", ns as f64 / 1e3)
    } else {
        format!("{}ns", ns)
    }
}
