use std::time::{Duration, Instant};

/// Observe sequence numbers are 24 bits wide; half the space decides
/// which of two values is newer.
const HALF_SPACE: u32 = 1 << 23;
/// After this long any sequence number counts as fresh again.
const MAX_REORDER_AGE: Duration = Duration::from_secs(128);

/// Tracks the newest notification seen for one observation and rejects
/// reordered older ones.
#[derive(Debug, Default)]
pub struct Freshness {
    last: Option<(u32, Instant)>,
}

impl Freshness {
    pub fn new() -> Freshness {
        Default::default()
    }

    /// Returns whether a notification with sequence `seq` arriving at `now`
    /// is newer than the last accepted one, and records it if so.
    pub fn accept(&mut self, seq: u32, now: Instant) -> bool {
        let seq = seq & 0x00FF_FFFF;
        let fresh = match self.last {
            None => true,
            Some((last, at)) => {
                (last < seq && seq - last < HALF_SPACE)
                    || (last > seq && last - seq > HALF_SPACE)
                    || now.saturating_duration_since(at) > MAX_REORDER_AGE
            }
        };
        if fresh {
            self.last = Some((seq, now));
        }
        fresh
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn increasing_sequence() {
        let now = Instant::now();
        let mut f = Freshness::new();
        assert!(f.accept(2, now));
        assert!(f.accept(3, now));
        assert!(!f.accept(3, now));
        assert!(!f.accept(2, now));
        assert!(f.accept(10, now));
    }

    #[test]
    fn wraparound_counts_as_newer() {
        let now = Instant::now();
        let mut f = Freshness::new();
        assert!(f.accept(0x00FF_FFFE, now));
        assert!(f.accept(1, now));
    }

    #[test]
    fn stale_state_resets() {
        let start = Instant::now();
        let mut f = Freshness::new();
        assert!(f.accept(50, start));
        assert!(!f.accept(40, start + Duration::from_secs(10)));
        assert!(f.accept(40, start + Duration::from_secs(129)));
    }
}
