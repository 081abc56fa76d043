use chrono::Duration;

/// Render a build duration as `"42s"` or `"3m 7s"`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let minutes = total / 60;
    let seconds = total % 60;

    if minutes == 0 {
        format!("{}s", seconds)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}
