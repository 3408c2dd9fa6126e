use std::path::Path;

/// Device list file, one record per line:
/// `<alsa_device> <invert:0|1> <pref_buffer_time_us> <pref_period_time_us>`.
/// Whitespace/TAB separated, `#` starts a comment. Line order determines the
/// device index; the first device is the master clock.
pub const RC_FILE: &str = "multirec.rc";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub invert: bool,
    pub buffer_time_us: u32,
    pub period_time_us: u32,
}

pub fn load(path: &Path) -> Result<Vec<DeviceConfig>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    parse(&text).map_err(|e| format!("{}: {e}", path.display()))
}

pub fn parse(text: &str) -> Result<Vec<DeviceConfig>, String> {
    let mut devices = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("");
        let mut fields = line.split_whitespace();
        let Some(name) = fields.next() else {
            continue;
        };
        let record = (|| {
            let invert = match fields.next()? {
                "0" => false,
                "1" => true,
                _ => return None,
            };
            let buffer_time_us = fields.next()?.parse().ok()?;
            let period_time_us = fields.next()?.parse().ok()?;
            Some(DeviceConfig {
                name: name.to_string(),
                invert,
                buffer_time_us,
                period_time_us,
            })
        })();
        match record {
            Some(dev) => devices.push(dev),
            None => {
                return Err(format!(
                    "line {}: expected `<device> <invert:0|1> <buffer_time_us> <period_time_us>`, got `{}`",
                    lineno + 1,
                    raw.trim()
                ));
            }
        }
    }
    if devices.is_empty() {
        return Err("no devices configured".to_string());
    }
    Ok(devices)
}
