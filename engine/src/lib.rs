pub mod bucket_queue;
mod capture;
pub mod chunk;
pub mod clock;
pub mod config;
pub mod device;
mod disk;
pub mod drift;
pub mod hw;
pub mod output;
pub mod session;

#[cfg(target_os = "linux")]
use std::path::PathBuf;
#[cfg(target_os = "linux")]
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::error;

/// Stream rate every device is opened at.
pub const RATE: u32 = 48000;

/// Samples per frame. The whole pipeline is fixed stereo.
pub const CHANNELS: usize = 2;

static FATAL_HOOK: OnceLock<Box<dyn Fn() + Send + Sync>> = OnceLock::new();

/// Registers a teardown hook run before a fatal exit. The UI uses this to
/// restore the terminal so the error stays readable.
pub fn set_fatal_hook(hook: impl Fn() + Send + Sync + 'static) {
    let _ = FATAL_HOOK.set(Box::new(hook));
}

/// Logs the message, runs the registered teardown hook and exits nonzero.
/// There is no recovery for hot-path failures: a soundcard that disappears
/// terminates the session.
pub fn fatal(msg: &str) -> ! {
    error!("fatal: {msg}");
    if let Some(hook) = FATAL_HOOK.get() {
        hook();
    }
    std::process::exit(1);
}

/// Reads `./multirec.rc`, opens every configured soundcard and builds the
/// session. The orchestration thread is not started yet; call
/// [`session::Session::spawn_orchestrator`] on the result.
#[cfg(target_os = "linux")]
pub fn init(out_dir: impl Into<PathBuf>) -> Result<Arc<session::Session<hw::alsa::AlsaDriver>>, String> {
    let specs = config::load(std::path::Path::new(config::RC_FILE))?;
    let mut devices = Vec::with_capacity(specs.len());
    for (idx, spec) in specs.iter().enumerate() {
        let driver = hw::alsa::AlsaDriver::open(&spec.name, RATE, spec.buffer_time_us, spec.period_time_us)?;
        devices.push(Arc::new(device::Device::new(idx, spec, driver)));
    }
    Ok(session::Session::new(devices, out_dir.into()))
}
