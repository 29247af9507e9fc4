/// Tracks how long the authoritative feed has been silent.
#[derive(Clone, Debug)]
pub struct FeedMonitor {
    stale_after_ms: u64,
    last_received_at: Option<u64>,
}

impl FeedMonitor {
    pub fn new(stale_after_ms: u64) -> Self {
        Self {
            stale_after_ms,
            last_received_at: None,
        }
    }

    /// Notes that a round frame arrived at `now`, accepted or not.
    pub fn record(&mut self, now: u64) {
        self.last_received_at = Some(self.last_received_at.map_or(now, |last| last.max(now)));
    }

    pub fn last_received_at(&self) -> Option<u64> {
        self.last_received_at
    }

    /// A feed that has never delivered anything is stale.
    pub fn is_stale(&self, now: u64) -> bool {
        match self.last_received_at {
            Some(last) => now.saturating_sub(last) > self.stale_after_ms,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness_threshold() {
        let mut monitor = FeedMonitor::new(2_000);
        assert!(monitor.is_stale(0));

        monitor.record(10_000);
        assert!(!monitor.is_stale(10_000));
        assert!(!monitor.is_stale(12_000));
        assert!(monitor.is_stale(12_001));

        // Out-of-order local instants never move the marker backwards.
        monitor.record(9_000);
        assert_eq!(monitor.last_received_at(), Some(10_000));
    }
}
