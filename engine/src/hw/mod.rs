#[cfg(target_os = "linux")]
pub mod alsa;
pub mod mock;
pub mod traits;

use traits::CaptureDriver;

/// Shares one device's driver handle between its capture loop and the
/// orchestrator.
///
/// PCM handles are `Send` but not `Sync`, yet no lock is warranted here:
/// the state barrier already serializes every access. A capture loop
/// touches its driver only in MONITORING/RECORDING, and the orchestrator
/// only while the loops are parked at the barrier (startup, the recording
/// restart, shutdown). Since [`CaptureDriver`] works through `&self`, the
/// cell never hands out a unique reference at all; the `Sync` assertion
/// below is exactly the barrier protocol, nothing more.
pub struct DriverCell<D> {
    driver: D,
}

impl<D: CaptureDriver> DriverCell<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    pub fn get(&self) -> &D {
        &self.driver
    }
}

// Safety: accesses are serialized by the state barrier, see above.
unsafe impl<D: Send> Sync for DriverCell<D> {}
