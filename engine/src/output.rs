use crate::{CHANNELS, device::ChannelWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Output files are `NN_c.wav`: zero-padded session number, then one letter
/// per channel (`a` = device 0 left, `b` = device 0 right, `c` = device 1
/// left, ...).
pub fn channel_file_name(session: u32, dev_idx: usize, channel: usize) -> String {
    let letter = (b'a' + (dev_idx * CHANNELS + channel) as u8) as char;
    format!("{session:02}_{letter}.wav")
}

fn is_session_file(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 8
        && bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[2] == b'_'
        && bytes[3].is_ascii_lowercase()
        && &bytes[4..] == b".wav"
}

/// Scans the output directory for previous session files and returns the
/// next free session number (1 if there are none).
pub fn next_session_number(dir: &Path) -> Result<u32, String> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| format!("cannot scan {}: {e}", dir.display()))?;
    let mut last = 0;
    for entry in entries {
        let entry = entry.map_err(|e| format!("cannot scan {}: {e}", dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if is_session_file(name) {
            if let Ok(num) = name[..2].parse::<u32>() {
                last = last.max(num);
            }
        }
    }
    Ok(last + 1)
}

/// Creates the output directory if needed and opens one mono 16-bit PCM
/// writer per channel per device for a new session. Returns the session
/// number and the writer pairs in device order.
pub fn open_session_files(
    dir: &Path,
    dev_count: usize,
    rate: u32,
) -> Result<(u32, Vec<[ChannelWriter; CHANNELS]>), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
    let session = next_session_number(dir)?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writers = Vec::with_capacity(dev_count);
    for dev_idx in 0..dev_count {
        let mut pair = Vec::with_capacity(CHANNELS);
        for channel in 0..CHANNELS {
            let path: PathBuf = dir.join(channel_file_name(session, dev_idx, channel));
            debug!("opening {}", path.display());
            let writer = hound::WavWriter::create(&path, spec)
                .map_err(|e| format!("cannot open {}: {e}", path.display()))?;
            pair.push(writer);
        }
        let pair: [ChannelWriter; CHANNELS] = pair
            .try_into()
            .map_err(|_| "channel writer count mismatch".to_string())?;
        writers.push(pair);
    }
    Ok((session, writers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_letters_run_across_devices() {
        assert_eq!(channel_file_name(1, 0, 0), "01_a.wav");
        assert_eq!(channel_file_name(1, 0, 1), "01_b.wav");
        assert_eq!(channel_file_name(1, 1, 0), "01_c.wav");
        assert_eq!(channel_file_name(12, 3, 1), "12_h.wav");
    }

    #[test]
    fn first_session_in_an_empty_dir_is_one() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_session_number(dir.path()).unwrap(), 1);
    }

    #[test]
    fn session_number_continues_after_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("03_a.wav"), b"").unwrap();
        std::fs::write(dir.path().join("03_b.wav"), b"").unwrap();
        // Unrelated files are ignored.
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::write(dir.path().join("99_A.wav"), b"").unwrap();
        assert_eq!(next_session_number(dir.path()).unwrap(), 4);
    }

    #[test]
    fn open_session_files_creates_per_channel_writers() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("take");
        let (session, writers) = open_session_files(&out, 2, 48000).unwrap();
        assert_eq!(session, 1);
        assert_eq!(writers.len(), 2);
        drop(writers);
        for name in ["01_a.wav", "01_b.wav", "01_c.wav", "01_d.wav"] {
            assert!(out.join(name).exists(), "{name} missing");
        }
    }
}
