use crate::CHANNELS;
use crate::chunk::{COMMIT_THRESHOLD, Chunk};
use crate::device::Device;
use crate::hw::traits::CaptureDriver;
use crate::session::{Session, State};
#[cfg(unix)]
use nix::libc;
use std::sync::Arc;
use tracing::{debug, error, trace};

#[cfg(unix)]
const RT_POLICY: i32 = libc::SCHED_FIFO;
const RT_PRIORITY_CAPTURE: i32 = 18;

/// Per-device capture loop. Blocks on the driver, feeds the meters and,
/// while recording, fills chunks and hands them to the disk worker. Every
/// state change is observed from a barrier rendezvous, so all loops switch
/// together.
pub(crate) fn run<D: CaptureDriver>(session: Arc<Session<D>>, device: Arc<Device<D>>) {
    if let Err(e) = configure_rt_thread(&format!("capture-{}", device.idx), RT_PRIORITY_CAPTURE) {
        error!("capture loop for {} without realtime priority: {e}", device.name);
    }

    let mut scratch = vec![0i16; device.period_frames() * CHANNELS];
    let mut partial: Option<Box<Chunk>> = None;

    loop {
        match session.state() {
            State::Skip => {
                trace!("device {} waiting for state change", device.idx);
                session.barrier_wait();
            }
            State::Monitoring => {
                // Capture and discard, the read only feeds the meters.
                if let Err(e) = read_period(&session, &device, &mut scratch) {
                    crate::fatal(&format!("device {}: {e}", device.name));
                }
            }
            State::Recording => {
                if let Err(e) = record_period(&session, &device, &mut partial) {
                    crate::fatal(&format!("device {}: {e}", device.name));
                }
            }
            State::Stopping => {
                if let Some(chunk) = partial.take() {
                    if chunk.len > 0 {
                        commit_chunk(&session, &device, chunk);
                    } else {
                        // Balance the bucket census; the worker discards
                        // empty chunks on its own.
                        device.queue.prod_free(chunk);
                    }
                }
                session.barrier_wait();
                debug!("device {} stopped", device.idx);
                return;
            }
        }
    }
}

/// Waits for one period, queries the buffered delay, timestamps and reads.
/// Returns `(frames_read, delay, timestamp)`.
fn read_period<D: CaptureDriver>(
    session: &Session<D>,
    device: &Device<D>,
    buf: &mut [i16],
) -> Result<(usize, i64, u64), String> {
    let driver = device.driver.get();
    driver.wait(device.wait_timeout_ms())?;
    let delay = driver.delay()?;
    let ts = session.clock.now_ticks();
    let frames = driver.readi(buf)?;
    device.update_peaks(&buf[..frames * CHANNELS]);
    Ok((frames, delay, ts))
}

/// One recording iteration: append a period to the open chunk, publish the
/// master clock if this is device 0, commit once past the threshold.
fn record_period<D: CaptureDriver>(
    session: &Session<D>,
    device: &Device<D>,
    partial: &mut Option<Box<Chunk>>,
) -> Result<(), String> {
    let mut chunk = match partial.take() {
        Some(chunk) => chunk,
        None => {
            let Some(mut chunk) = device.queue.prod_own() else {
                return Err("bucket queue exhausted".to_string());
            };
            chunk.reset();
            chunk
        }
    };
    if device.queue.has_grown() {
        debug!("device {} queue has grown", device.idx);
    }

    let period = device.period_frames();
    let (frames, delay, ts) = read_period(session, device, chunk.tail_mut(period))?;
    chunk.len += frames;
    chunk.ts = ts;
    chunk.delay = delay;
    if frames == 0 {
        *partial = Some(chunk);
        return Ok(());
    }

    if device.is_master() {
        session.master.publish(frames as u64, ts, delay);
    }

    if chunk.len > COMMIT_THRESHOLD {
        commit_chunk(session, device, chunk);
    } else {
        *partial = Some(chunk);
    }
    Ok(())
}

/// Tags the chunk with the current master snapshot and hands it over.
fn commit_chunk<D: CaptureDriver>(session: &Session<D>, device: &Device<D>, mut chunk: Box<Chunk>) {
    chunk.master = session.master.snapshot();
    trace!(
        device = device.idx,
        frames = chunk.len,
        full = device.queue.prod_len(),
        "chunk committed"
    );
    device.queue.prod_free(chunk);
}

/// Pins the calling thread to `SCHED_FIFO` at the given priority and
/// verifies the change took. Capture must not lose periods to scheduling.
pub(crate) fn configure_rt_thread(name: &str, priority: i32) -> Result<(), String> {
    #[cfg(unix)]
    {
        let thread = unsafe { libc::pthread_self() };
        #[cfg(any(target_os = "linux", target_os = "freebsd"))]
        let c_name = std::ffi::CString::new(name).map_err(|e| e.to_string())?;
        #[cfg(target_os = "linux")]
        unsafe {
            let _ = libc::pthread_setname_np(thread, c_name.as_ptr());
        }
        #[cfg(target_os = "freebsd")]
        unsafe {
            let _ = libc::pthread_set_name_np(thread, c_name.as_ptr());
        }

        let param = unsafe {
            let mut p = std::mem::zeroed::<libc::sched_param>();
            p.sched_priority = priority;
            p
        };
        let rc = unsafe { libc::pthread_setschedparam(thread, RT_POLICY, &param) };
        if rc != 0 {
            return Err(format!(
                "pthread_setschedparam({name}, prio {priority}) failed with errno {rc}"
            ));
        }

        let mut actual_policy = 0_i32;
        let mut actual_param = unsafe { std::mem::zeroed::<libc::sched_param>() };
        let rc =
            unsafe { libc::pthread_getschedparam(thread, &mut actual_policy, &mut actual_param) };
        if rc != 0 {
            return Err(format!(
                "pthread_getschedparam({name}) failed with errno {rc}"
            ));
        }
        if actual_policy != RT_POLICY || actual_param.sched_priority != priority {
            return Err(format!(
                "realtime verification failed for {name}: policy {actual_policy}, prio {}",
                actual_param.sched_priority
            ));
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = (name, priority);
        Err("realtime thread priority is not supported on this platform".to_string())
    }
}

/// Locks current and future pages in memory so the capture path never
/// faults.
pub(crate) fn lock_memory_pages() -> Result<(), String> {
    #[cfg(unix)]
    {
        let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
        if rc == 0 {
            Ok(())
        } else {
            Err(format!(
                "mlockall(MCL_CURRENT|MCL_FUTURE) failed: {}",
                std::io::Error::last_os_error()
            ))
        }
    }
    #[cfg(not(unix))]
    {
        Err("mlockall is not supported on this platform".to_string())
    }
}
