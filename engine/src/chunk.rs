use crate::CHANNELS;
use crate::clock::ClockSnapshot;

/// Capacity of one chunk, in frames.
pub const BSIZ: usize = 262144;

/// Resampler scratch size in frames, a bit bigger than a chunk to leave
/// room for stretching.
pub const MAX_OUT_FRAMES: usize = BSIZ + 1000;

/// A chunk is committed to the consumer once it holds this many frames.
pub const COMMIT_THRESHOLD: usize = 50000;

/// One batch of interleaved stereo frames handed from a capture loop to the
/// disk worker, tagged with the timing data the drift computation needs.
pub struct Chunk {
    /// Interleaved stereo samples, fixed `BSIZ * CHANNELS` capacity.
    pub samples: Vec<i16>,
    /// Frames currently filled.
    pub len: usize,
    /// Tick timestamp sampled right before the read that filled the most
    /// recent frames.
    pub ts: u64,
    /// Driver-reported unconsumed frames at that read.
    pub delay: i64,
    /// Master clock state copied at commit time.
    pub master: ClockSnapshot,
}

impl Chunk {
    pub fn new() -> Self {
        Self {
            samples: vec![0; BSIZ * CHANNELS],
            len: 0,
            ts: 0,
            delay: 0,
            master: ClockSnapshot::default(),
        }
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.ts = 0;
        self.delay = 0;
        self.master = ClockSnapshot::default();
    }

    /// The filled portion, interleaved.
    pub fn interleaved(&self) -> &[i16] {
        &self.samples[..self.len * CHANNELS]
    }

    /// Writable region for appending up to `frames` more frames, clamped to
    /// the remaining capacity.
    pub fn tail_mut(&mut self, frames: usize) -> &mut [i16] {
        let start = self.len * CHANNELS;
        let end = (self.len + frames).min(BSIZ) * CHANNELS;
        &mut self.samples[start..end]
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}
