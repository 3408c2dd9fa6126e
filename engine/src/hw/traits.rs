/// Blocking capture driver for one soundcard.
///
/// Mirrors the subset of the PCM capture API the pipeline needs: parameter
/// negotiation happens at open time, after which the capture loop only
/// waits, queries the buffered delay and reads interleaved S16LE stereo
/// frames. `link` ties a slave's start/stop/prepare to the master so all
/// cards start from the same trigger.
pub trait CaptureDriver: Send + 'static {
    fn prepare(&self) -> Result<(), String>;

    /// Stops the stream and discards buffered frames (`snd_pcm_drop`).
    fn drop_stream(&self) -> Result<(), String>;

    fn start(&self) -> Result<(), String>;

    fn link(&self, slave: &Self) -> Result<(), String>;

    /// Detaches this (slave) device from its link group.
    fn unlink(&self) -> Result<(), String>;

    /// Blocks until at least one period is available or the timeout passes.
    fn wait(&self, timeout_ms: i32) -> Result<bool, String>;

    /// Frames buffered inside the driver, i.e. captured but not yet read.
    fn delay(&self) -> Result<i64, String>;

    /// Reads up to `buf.len() / CHANNELS` interleaved frames. Returns the
    /// frame count actually read.
    fn readi(&self, buf: &mut [i16]) -> Result<usize, String>;

    /// Negotiated period, in frames.
    fn period_frames(&self) -> usize;

    /// Negotiated period time, in microseconds.
    fn period_time_us(&self) -> u32;
}
