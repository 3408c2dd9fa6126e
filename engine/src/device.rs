use crate::CHANNELS;
use crate::bucket_queue::DualQueue;
use crate::config::DeviceConfig;
use crate::drift::DriftResampler;
use crate::hw::DriverCell;
use crate::hw::traits::CaptureDriver;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

pub type ChannelWriter = hound::WavWriter<BufWriter<File>>;

/// Per-session disk state for one device, installed when recording starts
/// and torn down (writers finalized) after the disk worker drains.
pub struct DeviceRecording {
    pub resampler: DriftResampler,
    /// One mono file per channel, left then right.
    pub files: [ChannelWriter; CHANNELS],
}

/// One configured soundcard: its driver handle, its chunk queue towards the
/// disk worker and the bits of state the UI and the drift computation read.
pub struct Device<D> {
    pub idx: usize,
    pub name: String,
    pub invert: bool,
    pub driver: DriverCell<D>,
    pub queue: DualQueue,
    /// Cumulative frames the disk worker has written for this device in the
    /// current session.
    pub output_frames: AtomicU64,
    pub recording: Mutex<Option<DeviceRecording>>,
    peaks: [AtomicU16; CHANNELS],
    period_frames: usize,
    wait_timeout_ms: i32,
}

impl<D: CaptureDriver> Device<D> {
    pub fn new(idx: usize, config: &DeviceConfig, driver: D) -> Self {
        let period_frames = driver.period_frames();
        // The driver reports the period in us, its wait takes ms.
        let wait_timeout_ms = (driver.period_time_us() / 1000).max(1) as i32;
        Self {
            idx,
            name: config.name.clone(),
            invert: config.invert,
            driver: DriverCell::new(driver),
            queue: DualQueue::default(),
            output_frames: AtomicU64::new(0),
            recording: Mutex::new(None),
            peaks: [AtomicU16::new(0), AtomicU16::new(0)],
            period_frames,
            wait_timeout_ms,
        }
    }

    pub fn is_master(&self) -> bool {
        self.idx == 0
    }

    pub fn period_frames(&self) -> usize {
        self.period_frames
    }

    pub fn wait_timeout_ms(&self) -> i32 {
        self.wait_timeout_ms
    }

    /// Replaces the peak pair with the maxima of the frames just read.
    /// Plain relaxed stores: the meters read a stale but bounded value.
    pub fn update_peaks(&self, interleaved: &[i16]) {
        let mut max = [0u16; CHANNELS];
        for frame in interleaved.chunks_exact(CHANNELS) {
            for (ch, sample) in frame.iter().enumerate() {
                max[ch] = max[ch].max(sample.unsigned_abs());
            }
        }
        for (ch, peak) in max.into_iter().enumerate() {
            self.peaks[ch].store(peak, Ordering::Relaxed);
        }
    }

    /// Most recent per-channel peak magnitudes, in `0..=32768`.
    pub fn peaks(&self) -> [u16; CHANNELS] {
        [
            self.peaks[0].load(Ordering::Relaxed),
            self.peaks[1].load(Ordering::Relaxed),
        ]
    }
}
