use super::traits::CaptureDriver;
use crate::CHANNELS;
use std::sync::Mutex;
use std::time::Duration;

/// Synthetic capture source. Produces a deterministic sample ramp at a
/// configurable pace, standing in for a soundcard in the integration tests
/// and when bringing the pipeline up on a machine without capture hardware.
pub struct MockDriver {
    period_frames: usize,
    period_time_us: u32,
    wait_sleep: Duration,
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    next: i16,
    delay: i64,
}

impl MockDriver {
    pub fn new(period_frames: usize, period_time_us: u32) -> Self {
        Self {
            period_frames,
            period_time_us,
            wait_sleep: Duration::from_micros(u64::from(period_time_us)),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Overrides how long `wait` blocks per period, to compress or stretch
    /// test time relative to the nominal period.
    pub fn with_wait_sleep(mut self, sleep: Duration) -> Self {
        self.wait_sleep = sleep;
        self
    }

    /// Fixes the reported driver delay.
    pub fn with_delay(mut self, frames: i64) -> Self {
        self.state.get_mut().expect("mock state poisoned").delay = frames;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }
}

impl CaptureDriver for MockDriver {
    fn prepare(&self) -> Result<(), String> {
        // A freshly prepared stream restarts the ramp, which gives the
        // tests a known first sample.
        self.state().next = 0;
        Ok(())
    }

    fn drop_stream(&self) -> Result<(), String> {
        Ok(())
    }

    fn start(&self) -> Result<(), String> {
        Ok(())
    }

    fn link(&self, slave: &Self) -> Result<(), String> {
        let _ = slave;
        Ok(())
    }

    fn unlink(&self) -> Result<(), String> {
        Ok(())
    }

    fn wait(&self, _timeout_ms: i32) -> Result<bool, String> {
        std::thread::sleep(self.wait_sleep);
        Ok(true)
    }

    fn delay(&self) -> Result<i64, String> {
        Ok(self.state().delay)
    }

    fn readi(&self, buf: &mut [i16]) -> Result<usize, String> {
        let mut state = self.state();
        for frame in buf.chunks_exact_mut(CHANNELS) {
            frame.fill(state.next);
            state.next = state.next.wrapping_add(1);
        }
        Ok(buf.len() / CHANNELS)
    }

    fn period_frames(&self) -> usize {
        self.period_frames
    }

    fn period_time_us(&self) -> u32 {
        self.period_time_us
    }
}
