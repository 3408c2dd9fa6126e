use crate::CHANNELS;
use crate::chunk::{Chunk, MAX_OUT_FRAMES};
use crate::device::Device;
use crate::drift::drift_ratio;
use crate::hw::traits::CaptureDriver;
use crate::session::{Session, State};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace};

const IDLE_SLEEP: Duration = Duration::from_micros(500);

/// Single consumer draining every device queue to disk.
pub(crate) struct DiskWorker {
    handle: JoinHandle<()>,
}

impl DiskWorker {
    pub(crate) fn spawn<D: CaptureDriver>(session: Arc<Session<D>>) -> Self {
        let handle = std::thread::Builder::new()
            .name("disk-worker".to_string())
            .spawn(move || run(session))
            .unwrap_or_else(|e| crate::fatal(&format!("cannot spawn disk worker: {e}")));
        Self { handle }
    }

    pub(crate) fn join(self) {
        let _ = self.handle.join();
    }
}

/// Round-robins the device queues. A chunk from the master (or one captured
/// before the master clock first published) passes through untouched;
/// anything else is stretched against the master clock first. Each chunk is
/// then split into per-channel mono buffers and appended to the session
/// files.
fn run<D: CaptureDriver>(session: Arc<Session<D>>) {
    let mut out_scratch: Vec<i16> = Vec::with_capacity(MAX_OUT_FRAMES * CHANNELS);
    let mut left: Vec<i16> = Vec::with_capacity(MAX_OUT_FRAMES);
    let mut right: Vec<i16> = Vec::with_capacity(MAX_OUT_FRAMES);

    loop {
        let mut did_work = false;
        for device in &session.devices {
            let Some(chunk) = device.queue.cons_own() else {
                continue;
            };
            if chunk.len == 0 {
                trace!("discarding empty chunk from device {}", device.idx);
                device.queue.cons_free(chunk);
                continue;
            }
            did_work = true;
            if let Err(e) = write_chunk(
                &session,
                device,
                &chunk,
                &mut out_scratch,
                &mut left,
                &mut right,
            ) {
                crate::fatal(&format!("device {}: {e}", device.name));
            }
            device.queue.cons_free(chunk);
        }

        if !did_work {
            if session.drain_finished() {
                break;
            }
            std::thread::sleep(IDLE_SLEEP);
        }
    }
    debug!("disk worker drained");
}

fn write_chunk<D: CaptureDriver>(
    session: &Session<D>,
    device: &Device<D>,
    chunk: &Chunk,
    out_scratch: &mut Vec<i16>,
    left: &mut Vec<i16>,
    right: &mut Vec<i16>,
) -> Result<(), String> {
    let mut recording = device.recording.lock().expect("recording state poisoned");
    let Some(rec) = recording.as_mut() else {
        return Err("chunk arrived with no open recording".to_string());
    };

    let (data, out_len) = if device.is_master() || chunk.master.frame_count == 0 {
        (chunk.interleaved(), chunk.len)
    } else {
        let written = device.output_frames.load(Ordering::Relaxed);
        let ratio = drift_ratio(chunk, written, session.clock.ticks_per_frame());
        let end = session.state() == State::Stopping && device.queue.prod_len() > 0;
        let frames = rec
            .resampler
            .process(chunk.interleaved(), ratio, end, out_scratch)?;
        trace!(
            device = device.idx,
            written, ratio, input = chunk.len, output = frames,
            "drift-corrected chunk"
        );
        (&out_scratch[..frames * CHANNELS], frames)
    };

    device.output_frames.fetch_add(out_len as u64, Ordering::Relaxed);

    split_stereo(data, device.invert, left, right);
    for &sample in left.iter() {
        rec.files[0]
            .write_sample(sample)
            .map_err(|e| format!("left channel write failed: {e}"))?;
    }
    for &sample in right.iter() {
        rec.files[1]
            .write_sample(sample)
            .map_err(|e| format!("right channel write failed: {e}"))?;
    }
    Ok(())
}

/// Splits interleaved stereo into two mono buffers. With `invert` set each
/// sample is written as `0xFFFF - s`, i.e. the bitwise complement. That is
/// what existing sessions contain, so it is kept as-is; note it is not an
/// acoustic phase inversion (which would be `-s`).
fn split_stereo(interleaved: &[i16], invert: bool, left: &mut Vec<i16>, right: &mut Vec<i16>) {
    left.clear();
    right.clear();
    if invert {
        for frame in interleaved.chunks_exact(CHANNELS) {
            left.push(!frame[0]);
            right.push(!frame[1]);
        }
    } else {
        for frame in interleaved.chunks_exact(CHANNELS) {
            left.push(frame[0]);
            right.push(frame[1]);
        }
    }
}
