/// Renders a second count as a compact label: `"45s"`, `"3min 05s"`,
/// `"1h 02min"`.
///
/// Negative input is clamped to zero. Past one hour the seconds are dropped.
pub fn format_elapsed(seconds: i64) -> String {
    let seconds = seconds.max(0);

    if seconds < 60 {
        return format!("{seconds}s");
    }

    if seconds < 3600 {
        let minutes = seconds / 60;
        let rest = seconds % 60;
        return format!("{minutes}min {rest:02}s");
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{hours}h {minutes:02}min")
}

/// Same as [`format_elapsed`] for callers holding a float. NaN and infinities
/// render as `"0s"`; fractions are truncated.
pub fn format_elapsed_f64(seconds: f64) -> String {
    if !seconds.is_finite() {
        return format_elapsed(0);
    }
    // `as` saturates at the i64 bounds.
    format_elapsed(seconds.trunc() as i64)
}
