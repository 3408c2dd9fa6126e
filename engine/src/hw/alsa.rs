use super::traits::CaptureDriver;
use crate::CHANNELS;
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use tracing::{debug, info};

/// ALSA capture backend. One handle per soundcard, opened in blocking mode
/// so `readi` parks the capture loop until a period is ready.
pub struct AlsaDriver {
    pcm: PCM,
    period_frames: usize,
    period_time_us: u32,
}

impl AlsaDriver {
    pub fn open(
        device: &str,
        rate: u32,
        buffer_time_us: u32,
        period_time_us: u32,
    ) -> Result<Self, String> {
        let pcm = PCM::new(device, Direction::Capture, false)
            .map_err(|e| format!("failed to open capture device '{device}': {e}"))?;

        {
            let hwp = HwParams::any(&pcm).map_err(|e| e.to_string())?;
            hwp.set_rate_resample(false)
                .map_err(|e| format!("'{device}': disabling rate resampling: {e}"))?;
            hwp.set_access(Access::RWInterleaved)
                .map_err(|e| format!("'{device}': interleaved access: {e}"))?;
            hwp.set_format(Format::s16())
                .map_err(|e| format!("'{device}': S16LE format: {e}"))?;
            hwp.set_channels(CHANNELS as u32)
                .map_err(|e| format!("'{device}': {CHANNELS} channels: {e}"))?;
            hwp.set_rate(rate, ValueOr::Nearest)
                .map_err(|e| format!("'{device}': rate {rate}: {e}"))?;
            hwp.set_buffer_time_near(buffer_time_us, ValueOr::Nearest)
                .map_err(|e| format!("'{device}': buffer time {buffer_time_us}: {e}"))?;
            hwp.set_period_time_near(period_time_us, ValueOr::Nearest)
                .map_err(|e| format!("'{device}': period time {period_time_us}: {e}"))?;
            pcm.hw_params(&hwp)
                .map_err(|e| format!("'{device}': applying hw params: {e}"))?;
        }

        let (actual_rate, buffer_frames, period_frames, act_period_time_us) = {
            let hwp = pcm.hw_params_current().map_err(|e| e.to_string())?;
            (
                hwp.get_rate().map_err(|e| e.to_string())?,
                hwp.get_buffer_size().map_err(|e| e.to_string())? as usize,
                hwp.get_period_size().map_err(|e| e.to_string())? as usize,
                hwp.get_period_time().map_err(|e| e.to_string())?,
            )
        };
        if actual_rate != rate {
            debug!("'{device}': requested {rate} Hz, got {actual_rate} Hz");
        }

        {
            let swp = pcm.sw_params_current().map_err(|e| e.to_string())?;
            swp.set_avail_min(period_frames as alsa::pcm::Frames)
                .map_err(|e| format!("'{device}': avail_min: {e}"))?;
            pcm.sw_params(&swp)
                .map_err(|e| format!("'{device}': applying sw params: {e}"))?;
        }

        info!(
            device,
            rate = actual_rate,
            buffer_frames,
            period_frames,
            period_time_us = act_period_time_us,
            "capture params negotiated"
        );

        Ok(Self {
            pcm,
            period_frames,
            period_time_us: act_period_time_us,
        })
    }
}

impl CaptureDriver for AlsaDriver {
    fn prepare(&self) -> Result<(), String> {
        self.pcm.prepare().map_err(|e| format!("prepare failed: {e}"))
    }

    fn drop_stream(&self) -> Result<(), String> {
        self.pcm.drop().map_err(|e| format!("drop failed: {e}"))
    }

    fn start(&self) -> Result<(), String> {
        self.pcm.start().map_err(|e| format!("start failed: {e}"))
    }

    fn link(&self, slave: &Self) -> Result<(), String> {
        self.pcm
            .link(&slave.pcm)
            .map_err(|e| format!("link failed: {e}"))
    }

    fn unlink(&self) -> Result<(), String> {
        self.pcm.unlink().map_err(|e| format!("unlink failed: {e}"))
    }

    fn wait(&self, timeout_ms: i32) -> Result<bool, String> {
        self.pcm
            .wait(Some(timeout_ms as u32))
            .map_err(|e| format!("wait failed: {e}"))
    }

    fn delay(&self) -> Result<i64, String> {
        self.pcm
            .delay()
            .map(|frames| frames as i64)
            .map_err(|e| format!("delay query failed: {e}"))
    }

    fn readi(&self, buf: &mut [i16]) -> Result<usize, String> {
        let io = self
            .pcm
            .io_i16()
            .map_err(|e| format!("io handle failed: {e}"))?;
        // No xrun recovery: an overrun means sync is already lost.
        io.readi(buf).map_err(|e| format!("read failed: {e}"))
    }

    fn period_frames(&self) -> usize {
        self.period_frames
    }

    fn period_time_us(&self) -> u32 {
        self.period_time_us
    }
}
