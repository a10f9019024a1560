use chrono::{DateTime, Duration, Local, Utc};

/// Rules may not tick faster than this.
pub const MIN_INTERVAL_SECS: i64 = 10;

/// Overlap subtracted from the previous cursor so documents with boundary
/// timestamps (or documents that arrived while the previous query was
/// running) are not lost between windows.
const BACK_OVERLAP_SECS: i64 = 2;

/// Lookback for a rule that has never run.
const BOOTSTRAP_LOOKBACK_SECS: i64 = 300;

/// Resolves the `[from, to)` query window for one tick.
///
/// `from` is the previous cursor widened by the 2-second back-overlap, or
/// `now - 5min` when the rule has never run. `to` is always `now` and
/// becomes the next cursor on success.
pub fn resolve_window(
    last_run_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = match last_run_time {
        Some(t) => t - Duration::seconds(BACK_OVERLAP_SECS),
        None => now - Duration::seconds(BOOTSTRAP_LOOKBACK_SECS),
    };
    (from, now)
}

/// The interval gate: true when not enough time has passed since the
/// (overlap-adjusted) previous run. Forced executions bypass this.
pub fn should_skip(
    last_run_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval_secs: i64,
    force: bool,
) -> bool {
    if force {
        return false;
    }
    let (from, _) = resolve_window(last_run_time, now);
    now - from < Duration::seconds(interval_secs)
}

/// Clamps a rule interval to the enforced minimum.
pub fn clamp_interval(interval_secs: i64) -> std::time::Duration {
    std::time::Duration::from_secs(interval_secs.max(MIN_INTERVAL_SECS) as u64)
}

/// Human time-range string stored on the alert, in server local time.
pub fn format_time_range(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format!(
        "{} ~ {}",
        from.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        to.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_overlaps_previous_cursor_by_two_seconds() {
        let now = Utc::now();
        let cursor = now - Duration::seconds(60);

        let (from, to) = resolve_window(Some(cursor), now);
        assert_eq!(to, now);
        assert_eq!(cursor - from, Duration::seconds(2));
    }

    #[test]
    fn consecutive_windows_overlap_exactly_two_seconds() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(60);
        let t2 = t1 + Duration::seconds(60);

        // 第一跳结束后游标推进到 t1，第二跳窗口从 t1 - 2s 开始
        let (_, first_to) = resolve_window(Some(t0), t1);
        let (second_from, _) = resolve_window(Some(first_to), t2);
        assert_eq!(first_to - second_from, Duration::seconds(2));
    }

    #[test]
    fn bootstrap_window_looks_back_five_minutes() {
        let now = Utc::now();
        let (from, to) = resolve_window(None, now);
        assert_eq!(to - from, Duration::seconds(300));
    }

    #[test]
    fn gate_skips_until_interval_elapses() {
        let now = Utc::now();
        let recent = now - Duration::seconds(5);
        assert!(should_skip(Some(recent), now, 60, false));

        let stale = now - Duration::seconds(120);
        assert!(!should_skip(Some(stale), now, 60, false));

        // 从未运行过：视作 5 分钟前
        assert!(!should_skip(None, now, 60, false));
        assert!(should_skip(None, now, 600, false));
    }

    #[test]
    fn force_bypasses_gate() {
        let now = Utc::now();
        let recent = now - Duration::seconds(1);
        assert!(!should_skip(Some(recent), now, 3600, true));
    }

    #[test]
    fn interval_clamps_to_minimum() {
        assert_eq!(clamp_interval(3), std::time::Duration::from_secs(10));
        assert_eq!(clamp_interval(0), std::time::Duration::from_secs(10));
        assert_eq!(clamp_interval(-5), std::time::Duration::from_secs(10));
        assert_eq!(clamp_interval(60), std::time::Duration::from_secs(60));
    }

    #[test]
    fn time_range_string_shape() {
        let now = Utc::now();
        let s = format_time_range(now - Duration::minutes(5), now);
        let parts: Vec<&str> = s.split(" ~ ").collect();
        assert_eq!(parts.len(), 2);
        for part in parts {
            assert_eq!(part.len(), "2025-11-28 10:00:00".len());
        }
    }
}
