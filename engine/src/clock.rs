use std::sync::Mutex;
use std::time::Instant;

/// Monotonic tick source shared by every capture loop.
///
/// The drift algebra only needs timestamps in a unit convertible to frames:
/// `ticks_per_frame` divides a tick difference down to a frame difference.
/// Ticks are nanoseconds from a process-wide anchor, so the tick rate is
/// fixed and needs no startup calibration pass.
pub struct TickClock {
    origin: Instant,
    ticks_per_frame: u64,
}

impl TickClock {
    pub fn new(rate: u32) -> Self {
        Self {
            origin: Instant::now(),
            ticks_per_frame: 1_000_000_000 / u64::from(rate),
        }
    }

    pub fn now_ticks(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    pub fn ticks_per_frame(&self) -> u64 {
        self.ticks_per_frame
    }
}

/// State of the master device as of its most recent successful read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockSnapshot {
    /// Total frames the master capture loop has read.
    pub frame_count: u64,
    /// Tick timestamp of that read.
    pub ts: u64,
    /// Master driver delay at that read, in frames.
    pub delay: i64,
}

/// Lock-protected master snapshot. Written only by device 0's capture loop;
/// copied into every chunk at commit time. The lock is held only across the
/// three-field copy.
#[derive(Default)]
pub struct MasterClock {
    inner: Mutex<ClockSnapshot>,
}

impl MasterClock {
    pub fn publish(&self, frames: u64, ts: u64, delay: i64) {
        let mut snap = self.inner.lock().expect("master clock poisoned");
        snap.frame_count += frames;
        snap.ts = ts;
        snap.delay = delay;
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        *self.inner.lock().expect("master clock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_convert_to_frames() {
        let clock = TickClock::new(48000);
        assert_eq!(clock.ticks_per_frame(), 20833);
    }

    #[test]
    fn publish_accumulates_frames_and_overwrites_timing() {
        let master = MasterClock::default();
        master.publish(1200, 500, 3);
        master.publish(1200, 900, 7);

        let snap = master.snapshot();
        assert_eq!(snap.frame_count, 2400);
        assert_eq!(snap.ts, 900);
        assert_eq!(snap.delay, 7);
    }
}
