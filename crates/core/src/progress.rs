//! Progress arithmetic and notification de-duplication.

/// Minimum percent movement that warrants a new notification.
const MIN_PERCENT_STEP: f64 = 1.0;

/// Rebuild a 64-bit byte count from the daemon's 32-bit low/high halves.
pub fn combine_parts(lo: u32, hi: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

/// Point-in-time progress of a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// 0.0 - 100.0
    pub percent: f64,
    pub status_text: String,
}

impl ProgressSnapshot {
    pub fn new(percent: f64, status_text: impl Into<String>) -> Self {
        Self {
            percent: percent.clamp(0.0, 100.0),
            status_text: status_text.into(),
        }
    }

    /// Percent rounded to one decimal, as reported to the callback.
    pub fn rounded_percent(&self) -> f64 {
        (self.percent * 10.0).round() / 10.0
    }
}

/// Derive progress from total and remaining byte counts.
///
/// A zero total (size not known yet) reads as 0%.
pub fn extract_progress(
    total: u64,
    remaining: u64,
    status_text: impl Into<String>,
) -> ProgressSnapshot {
    let percent = if total == 0 {
        0.0
    } else {
        let done = total.saturating_sub(remaining);
        done as f64 / total as f64 * 100.0
    };
    ProgressSnapshot::new(percent, status_text)
}

/// Decides which snapshots are worth a notification.
///
/// Compares against the last snapshot it approved, so slow drift still
/// produces an update once it adds up to a full percent.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: Option<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true (and remembers the snapshot) if it should be reported.
    pub fn observe(&mut self, snapshot: &ProgressSnapshot) -> bool {
        let changed = match &self.last {
            None => true,
            Some(last) => {
                (snapshot.percent - last.percent).abs() >= MIN_PERCENT_STEP
                    || snapshot.status_text != last.status_text
            }
        };
        if changed {
            self.last = Some(snapshot.clone());
        }
        changed
    }

    /// Percent of the last reported snapshot.
    pub fn last_percent(&self) -> Option<f64> {
        self.last.as_ref().map(|s| s.percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_parts() {
        assert_eq!(combine_parts(0, 0), 0);
        assert_eq!(combine_parts(123, 0), 123);
        assert_eq!(combine_parts(0, 1), 1 << 32);
        assert_eq!(combine_parts(u32::MAX, u32::MAX), u64::MAX);

        for (lo, hi) in [(1u32, 2u32), (705_032_704, 1), (u32::MAX, 7)] {
            let expected = hi as u64 * 4_294_967_296 + lo as u64;
            assert_eq!(combine_parts(lo, hi), expected);
            // Pure function: repeated calls agree
            assert_eq!(combine_parts(lo, hi), combine_parts(lo, hi));
        }
    }

    #[test]
    fn test_extract_progress_bounds() {
        assert_eq!(extract_progress(1000, 1000, "DOWNLOADING").percent, 0.0);
        assert_eq!(extract_progress(1000, 0, "DOWNLOADING").percent, 100.0);
        assert_eq!(extract_progress(1000, 250, "DOWNLOADING").percent, 75.0);
        assert_eq!(extract_progress(0, 0, "QUEUED").percent, 0.0);
        // remaining above total is clamped rather than negative
        assert_eq!(extract_progress(100, 500, "DOWNLOADING").percent, 0.0);
    }

    #[test]
    fn test_extract_progress_monotonic_in_remaining() {
        let total = 10_000_000_000u64;
        let mut previous = f64::MAX;
        for step in 0..=100u64 {
            let remaining = total / 100 * step;
            let percent = extract_progress(total, remaining, "DOWNLOADING").percent;
            assert!((0.0..=100.0).contains(&percent));
            assert!(percent <= previous);
            previous = percent;
        }
    }

    #[test]
    fn test_rounded_percent() {
        let snapshot = extract_progress(3, 2, "DOWNLOADING");
        assert_eq!(snapshot.rounded_percent(), 33.3);
    }

    #[test]
    fn test_tracker_first_snapshot_reported() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.observe(&ProgressSnapshot::new(0.0, "QUEUED")));
        assert_eq!(tracker.last_percent(), Some(0.0));
    }

    #[test]
    fn test_tracker_ignores_repeats_and_small_steps() {
        let mut tracker = ProgressTracker::new();
        let snapshot = ProgressSnapshot::new(10.0, "DOWNLOADING");
        assert!(tracker.observe(&snapshot));
        for _ in 0..5 {
            assert!(!tracker.observe(&snapshot));
        }
        assert!(!tracker.observe(&ProgressSnapshot::new(10.6, "DOWNLOADING")));
        assert!(tracker.observe(&ProgressSnapshot::new(11.0, "DOWNLOADING")));
    }

    #[test]
    fn test_tracker_accumulates_drift() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.observe(&ProgressSnapshot::new(10.0, "DOWNLOADING")));
        assert!(!tracker.observe(&ProgressSnapshot::new(10.5, "DOWNLOADING")));
        assert!(!tracker.observe(&ProgressSnapshot::new(10.9, "DOWNLOADING")));
        assert!(tracker.observe(&ProgressSnapshot::new(11.2, "DOWNLOADING")));
    }

    #[test]
    fn test_tracker_reports_status_change() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.observe(&ProgressSnapshot::new(100.0, "DOWNLOADING")));
        assert!(tracker.observe(&ProgressSnapshot::new(100.0, "UNPACKING")));
        assert!(!tracker.observe(&ProgressSnapshot::new(100.0, "UNPACKING")));
    }
}
