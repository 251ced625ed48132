use std::fs;
use std::process::Command;

/// Stable machine id from systemd or D-Bus.
pub fn machine_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// First `model name` entry of `/proc/cpuinfo`, falling back to `lscpu`.
pub fn cpu_model() -> Option<String> {
    if let Ok(info) = fs::read_to_string("/proc/cpuinfo") {
        let model = info
            .lines()
            .find(|line| line.starts_with("model name"))
            .and_then(|line| line.split(':').nth(1))
            .map(|s| s.trim().to_string());
        if let Some(model) = model.filter(|m| !m.is_empty()) {
            return Some(model);
        }
    }

    let output = Command::new("lscpu").output().ok()?;
    let result = String::from_utf8_lossy(&output.stdout);
    result
        .lines()
        .find(|line| line.contains("Model name"))
        .and_then(|line| line.split(':').nth(1))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn hostname() -> Option<String> {
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
