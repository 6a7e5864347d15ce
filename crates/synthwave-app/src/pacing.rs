use std::time::{Duration, Instant};

/// Largest delta handed to the renderer; longer stalls are treated as one slow frame.
pub const MAX_DELTA: f32 = 0.1;

/// Frame clock: elapsed time, clamped delta, and the next deadline for the
/// configured target rate.
pub struct FramePacer {
    start: Instant,
    last: Option<Instant>,
    interval: Duration,
    next_deadline: Instant,
}

/// Timing for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTime {
    pub time: f32,
    pub delta: f32,
}

impl FramePacer {
    pub fn new(target_fps: u32, now: Instant) -> Self {
        let interval = interval_for(target_fps);
        Self {
            start: now,
            last: None,
            interval,
            next_deadline: now,
        }
    }

    /// Starts a frame at `now`. The first frame has zero delta.
    pub fn tick(&mut self, now: Instant) -> FrameTime {
        let delta = self
            .last
            .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f32())
            .min(MAX_DELTA);
        self.last = Some(now);

        self.next_deadline += self.interval;
        // Fell behind: pace from now instead of bursting to catch up.
        if self.next_deadline < now {
            self.next_deadline = now + self.interval;
        }

        FrameTime {
            time: now.saturating_duration_since(self.start).as_secs_f32(),
            delta,
        }
    }

    /// When the next frame should be requested.
    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }
}

fn interval_for(target_fps: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(target_fps.clamp(1, 120)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_has_zero_delta() {
        let t0 = Instant::now();
        let mut pacer = FramePacer::new(60, t0);
        assert_eq!(pacer.tick(t0).delta, 0.0);
    }

    #[test]
    fn delta_is_clamped() {
        let t0 = Instant::now();
        let mut pacer = FramePacer::new(60, t0);
        pacer.tick(t0);
        let frame = pacer.tick(t0 + Duration::from_secs(2));
        assert_eq!(frame.delta, MAX_DELTA);
        assert!((frame.time - 2.0).abs() < 1e-4);
    }

    #[test]
    fn deadline_advances_by_interval() {
        let t0 = Instant::now();
        let mut pacer = FramePacer::new(50, t0);
        pacer.tick(t0);
        assert_eq!(pacer.next_deadline(), t0 + Duration::from_millis(20));
        let frame = pacer.tick(t0 + Duration::from_millis(20));
        assert!((frame.delta - 0.02).abs() < 1e-5);
        assert_eq!(pacer.next_deadline(), t0 + Duration::from_millis(40));
    }

    #[test]
    fn late_frame_resets_deadline() {
        let t0 = Instant::now();
        let mut pacer = FramePacer::new(50, t0);
        pacer.tick(t0);
        let late = t0 + Duration::from_millis(500);
        pacer.tick(late);
        assert_eq!(pacer.next_deadline(), late + Duration::from_millis(20));
    }
}
