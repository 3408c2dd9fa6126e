use crate::CHANNELS;
use crate::chunk::Chunk;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::trace;

/// Internal resampler block, in frames. Up to one block minus one frame is
/// carried between chunks; keeping the block well under a period keeps the
/// end-of-session shortfall inside the frame-count tolerance.
const BLOCK_FRAMES: usize = 256;

/// Hard bounds for the instantaneous ratio. Drift ratios sit within a few
/// hundred ppm of 1.0 once the stream settles; anything outside these
/// bounds is a timing glitch and ends the session.
const MAX_RATIO_RELATIVE: f64 = 16.0;

/// Instantaneous resampling ratio realigning a slave chunk to the master
/// clock.
///
/// From the master snapshot taken at commit time, estimate how many frames
/// the master had captured at the chunk's own read instant
/// (`frame_count + delay + tsDiff`); the slave should have captured the
/// same amount (`output_frames + len + delay`). The ratio stretches the
/// chunk by the shortfall so the difference dies out over a few chunks.
pub fn drift_ratio(chunk: &Chunk, output_frames: u64, ticks_per_frame: u64) -> f64 {
    let ts_diff = (chunk.ts / ticks_per_frame) as i64 - (chunk.master.ts / ticks_per_frame) as i64;
    let expected = chunk.master.frame_count as i64 + chunk.master.delay + ts_diff;
    let actual = output_frames as i64 + chunk.len as i64 + chunk.delay;
    let diff = expected - actual;
    (chunk.len as i64 + diff) as f64 / chunk.len as f64
}

/// Streaming drift compensator for one slave device.
///
/// Wraps a linear `rubato` resampler. The ratio is submitted per chunk with
/// ramping enabled, so it is interpolated linearly instead of stepping.
/// Input arrives as arbitrarily sized interleaved chunks and is cut into
/// fixed blocks internally; frames short of a full block carry over to the
/// next chunk and are flushed at end of input.
pub struct DriftResampler {
    inner: FastFixedIn<f32>,
    pending: [Vec<f32>; CHANNELS],
}

impl DriftResampler {
    pub fn new() -> Result<Self, String> {
        let inner = FastFixedIn::new(
            1.0,
            MAX_RATIO_RELATIVE,
            PolynomialDegree::Linear,
            BLOCK_FRAMES,
            CHANNELS,
        )
        .map_err(|e| format!("failed to create resampler: {e}"))?;
        Ok(Self {
            inner,
            pending: [Vec::new(), Vec::new()],
        })
    }

    /// Resamples one interleaved chunk at `ratio`, appending interleaved
    /// output to `out`. Returns the frames generated.
    pub fn process(
        &mut self,
        interleaved: &[i16],
        ratio: f64,
        end_of_input: bool,
        out: &mut Vec<i16>,
    ) -> Result<usize, String> {
        if !(1.0 / MAX_RATIO_RELATIVE..=MAX_RATIO_RELATIVE).contains(&ratio) {
            return Err(format!("resample ratio {ratio} out of bounds"));
        }
        self.inner
            .set_resample_ratio(ratio, true)
            .map_err(|e| format!("set_ratio({ratio}) failed: {e}"))?;

        for frame in interleaved.chunks_exact(CHANNELS) {
            for (ch, &sample) in frame.iter().enumerate() {
                self.pending[ch].push(f32::from(sample) / 32768.0);
            }
        }

        out.clear();
        while self.pending[0].len() >= BLOCK_FRAMES {
            let block: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|p| p.drain(..BLOCK_FRAMES).collect())
                .collect();
            let produced = self
                .inner
                .process(&block, None)
                .map_err(|e| format!("resample failed: {e}"))?;
            interleave_into(out, &produced);
        }

        if end_of_input {
            if !self.pending[0].is_empty() {
                let rest: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
                let produced = self
                    .inner
                    .process_partial(Some(&rest), None)
                    .map_err(|e| format!("final resample failed: {e}"))?;
                interleave_into(out, &produced);
            }
            let tail = self
                .inner
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| format!("resample drain failed: {e}"))?;
            interleave_into(out, &tail);
        }

        let frames = out.len() / CHANNELS;
        trace!(ratio, input = interleaved.len() / CHANNELS, output = frames, "resampled chunk");
        Ok(frames)
    }
}

fn interleave_into(out: &mut Vec<i16>, channels: &[Vec<f32>]) {
    for i in 0..channels[0].len() {
        for ch in channels {
            let v = (ch[i] * 32768.0).round().clamp(-32768.0, 32767.0);
            out.push(v as i16);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockSnapshot;

    const TPF: u64 = 20833;

    fn chunk_with(len: usize, ts: u64, delay: i64, master: ClockSnapshot) -> Chunk {
        let mut chunk = Chunk::new();
        chunk.len = len;
        chunk.ts = ts;
        chunk.delay = delay;
        chunk.master = master;
        chunk
    }

    #[test]
    fn ratio_stretches_a_lagging_slave() {
        let master = ClockSnapshot {
            frame_count: 48000,
            ts: 1000 * TPF,
            delay: 100,
        };
        // Read 10 frames of wall time after the master, 50 frames short.
        let chunk = chunk_with(1000, 1010 * TPF, 60, master);
        let ratio = drift_ratio(&chunk, 47000, TPF);
        assert!((ratio - 1.05).abs() < 1e-9, "ratio = {ratio}");
    }

    #[test]
    fn ratio_is_unity_when_counts_agree() {
        let master = ClockSnapshot {
            frame_count: 96000,
            ts: 500 * TPF,
            delay: 0,
        };
        let chunk = chunk_with(2000, 500 * TPF, 0, master);
        let ratio = drift_ratio(&chunk, 94000, TPF);
        assert!((ratio - 1.0).abs() < 1e-9, "ratio = {ratio}");
    }

    #[test]
    fn out_of_bounds_ratio_is_an_error() {
        let mut resampler = DriftResampler::new().unwrap();
        let input = vec![0i16; 512 * CHANNELS];
        let mut out = Vec::new();
        assert!(resampler.process(&input, 40.0, false, &mut out).is_err());
        assert!(resampler.process(&input, f64::NAN, false, &mut out).is_err());
    }

    #[test]
    fn unity_ratio_roughly_preserves_length() {
        let mut resampler = DriftResampler::new().unwrap();
        let input: Vec<i16> = (0..10000 * CHANNELS as i32).map(|v| (v % 997) as i16).collect();
        let mut out = Vec::new();
        let frames = resampler.process(&input, 1.0, true, &mut out).unwrap();
        assert!(
            (frames as i64 - 10000).unsigned_abs() <= BLOCK_FRAMES as u64,
            "generated {frames} frames"
        );
        assert_eq!(out.len(), frames * CHANNELS);
    }

    #[test]
    fn ratio_above_one_generates_more_frames() {
        let mut resampler = DriftResampler::new().unwrap();
        let input = vec![0i16; 10000 * CHANNELS];
        let mut out = Vec::new();
        let frames = resampler.process(&input, 1.01, true, &mut out).unwrap();
        let target = 10100i64;
        assert!(
            (frames as i64 - target).unsigned_abs() <= BLOCK_FRAMES as u64,
            "generated {frames} frames, wanted about {target}"
        );
    }

    #[test]
    fn short_remainder_is_carried_until_end() {
        let mut resampler = DriftResampler::new().unwrap();
        let input = vec![0i16; 100 * CHANNELS];
        let mut out = Vec::new();

        // Under one block: nothing comes out yet.
        let frames = resampler.process(&input, 1.0, false, &mut out).unwrap();
        assert_eq!(frames, 0);

        // End of input flushes the carried frames.
        let frames = resampler.process(&[], 1.0, true, &mut out).unwrap();
        assert!(frames > 0);
    }
}
