use crate::capture;
use crate::clock::{MasterClock, TickClock};
use crate::device::{Device, DeviceRecording};
use crate::disk::DiskWorker;
use crate::drift::DriftResampler;
use crate::hw::traits::CaptureDriver;
use crate::{RATE, output};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

const REQUEST_POLL: Duration = Duration::from_millis(100);

/// Recording state observed by every capture loop. Written only by the
/// orchestration thread; every change is announced through the barrier so
/// all loops pick it up from a known rendezvous point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Monitoring = 0,
    Recording = 1,
    Stopping = 2,
    Skip = 3,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Monitoring,
            1 => State::Recording,
            2 => State::Stopping,
            _ => State::Skip,
        }
    }
}

/// Start/stop events coming from the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Request {
    None = 0,
    Start = 1,
    Stop = 2,
}

impl Request {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Request::Start,
            2 => Request::Stop,
            _ => Request::None,
        }
    }
}

/// Everything one recording run shares: the device list, the state machine,
/// the rendezvous barrier and the master clock.
pub struct Session<D> {
    pub devices: Vec<Arc<Device<D>>>,
    pub clock: TickClock,
    pub master: MasterClock,
    state: AtomicU8,
    request: AtomicU8,
    /// One slot per capture loop plus the orchestrator.
    barrier: Barrier,
    /// Raised once no further chunks will be committed; the disk worker
    /// exits on the first idle round that sees it.
    finished: AtomicBool,
    out_dir: PathBuf,
}

impl<D: CaptureDriver> Session<D> {
    pub fn new(devices: Vec<Arc<Device<D>>>, out_dir: PathBuf) -> Arc<Self> {
        assert!(!devices.is_empty(), "session needs at least one device");
        let barrier = Barrier::new(devices.len() + 1);
        Arc::new(Self {
            devices,
            clock: TickClock::new(RATE),
            master: MasterClock::default(),
            state: AtomicU8::new(State::Skip as u8),
            request: AtomicU8::new(Request::None as u8),
            barrier,
            finished: AtomicBool::new(false),
            out_dir,
        })
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn request_start(&self) {
        self.request.store(Request::Start as u8, Ordering::Release);
    }

    pub fn request_stop(&self) {
        self.request.store(Request::Stop as u8, Ordering::Release);
    }

    fn take_request(&self) -> Request {
        Request::from_u8(self.request.swap(Request::None as u8, Ordering::AcqRel))
    }

    pub(crate) fn barrier_wait(&self) {
        self.barrier.wait();
    }

    pub(crate) fn drain_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Starts the orchestration thread: prepares and links the devices,
    /// spawns one capture loop per device and runs the state machine until
    /// a stop request has drained everything. Join the returned handle to
    /// wait for the session to end.
    pub fn spawn_orchestrator(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        std::thread::Builder::new()
            .name("orchestrator".to_string())
            .spawn(move || session.run())
            .unwrap_or_else(|e| crate::fatal(&format!("cannot spawn orchestrator: {e}")))
    }

    fn run(self: Arc<Self>) {
        if let Err(e) = capture::lock_memory_pages() {
            error!("capture memory lock not enabled: {e}");
        }

        let master = &self.devices[0];
        for dev in &self.devices {
            if let Err(e) = dev.driver.get().prepare() {
                crate::fatal(&format!("device {}: {e}", dev.name));
            }
            if !dev.is_master() {
                if let Err(e) = master.driver.get().link(dev.driver.get()) {
                    crate::fatal(&format!("device {}: {e}", dev.name));
                }
                debug!("linked device {} to master", dev.idx);
            }
        }

        let mut loops = Vec::with_capacity(self.devices.len());
        for dev in &self.devices {
            let session = Arc::clone(&self);
            let device = Arc::clone(dev);
            let handle = std::thread::Builder::new()
                .name(format!("capture-{}", dev.idx))
                .spawn(move || capture::run(session, device))
                .unwrap_or_else(|e| crate::fatal(&format!("cannot spawn capture loop: {e}")));
            loops.push(handle);
        }

        if let Err(e) = master.driver.get().start() {
            crate::fatal(&format!("device {}: {e}", master.name));
        }
        info!("monitoring {} devices", self.devices.len());
        self.set_state(State::Monitoring);
        self.barrier_wait();

        let mut worker: Option<DiskWorker> = None;
        let mut running = true;
        while running {
            let request = self.take_request();
            match self.state() {
                State::Monitoring => match request {
                    Request::Start => {
                        self.set_state(State::Skip);
                        self.barrier_wait();
                        if let Err(e) = self.init_recording(&mut worker) {
                            crate::fatal(&e);
                        }
                        self.set_state(State::Recording);
                        self.barrier_wait();
                        info!("recording");
                    }
                    Request::Stop => {
                        self.set_state(State::Stopping);
                        self.barrier_wait();
                        running = false;
                    }
                    Request::None => {}
                },
                State::Recording => {
                    if request == Request::Stop {
                        self.set_state(State::Stopping);
                        // All loops commit their partial chunks before they
                        // arrive here, so after this rendezvous every chunk
                        // of the session is queued.
                        self.barrier_wait();
                        self.finished.store(true, Ordering::Release);
                        if let Some(w) = worker.take() {
                            w.join();
                        }
                        running = false;
                    }
                }
                _ => {}
            }
            if running {
                std::thread::sleep(REQUEST_POLL);
            }
        }

        for handle in loops {
            let _ = handle.join();
        }
        self.close_outputs();
        info!("session closed");
    }

    /// Restarts capture in sync and opens the output files: unlink the
    /// slaves, drop and prepare every card individually, relink, reset the
    /// per-device counters and resamplers, open the session files, then
    /// fire the linked group off the master.
    fn init_recording(self: &Arc<Self>, worker: &mut Option<DiskWorker>) -> Result<(), String> {
        *worker = Some(DiskWorker::spawn(Arc::clone(self)));

        let master = &self.devices[0];
        for dev in &self.devices[1..] {
            dev.driver
                .get()
                .unlink()
                .map_err(|e| format!("device {}: {e}", dev.name))?;
        }
        for dev in &self.devices {
            let driver = dev.driver.get();
            driver
                .drop_stream()
                .map_err(|e| format!("device {}: {e}", dev.name))?;
            driver
                .prepare()
                .map_err(|e| format!("device {}: {e}", dev.name))?;
        }
        for dev in &self.devices[1..] {
            master
                .driver
                .get()
                .link(dev.driver.get())
                .map_err(|e| format!("device {}: {e}", dev.name))?;
        }
        for dev in &self.devices {
            dev.output_frames.store(0, Ordering::Relaxed);
        }

        let (session_no, writers) = output::open_session_files(&self.out_dir, self.devices.len(), RATE)?;
        for (dev, files) in self.devices.iter().zip(writers) {
            let resampler = DriftResampler::new()?;
            *dev.recording.lock().expect("recording state poisoned") =
                Some(DeviceRecording { resampler, files });
        }
        info!(session = session_no, dir = %self.out_dir.display(), "session files open");

        master
            .driver
            .get()
            .start()
            .map_err(|e| format!("device {}: {e}", master.name))
    }

    /// Finalizes the session files, patching the WAV headers. Runs after
    /// the disk worker has drained, so the frame counts are complete.
    fn close_outputs(&self) {
        for dev in &self.devices {
            let rec = dev.recording.lock().expect("recording state poisoned").take();
            if let Some(rec) = rec {
                for writer in rec.files {
                    if let Err(e) = writer.finalize() {
                        error!("finalizing output for device {}: {e}", dev.name);
                    }
                }
            }
        }
    }
}
