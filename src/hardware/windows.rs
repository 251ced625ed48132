use std::process::Command;

/// `MachineGuid` from the Cryptography registry key.
pub fn machine_id() -> Option<String> {
    let output = Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()
        .ok()?;

    let result = String::from_utf8_lossy(&output.stdout);
    result
        .lines()
        .find(|line| line.contains("MachineGuid"))
        .and_then(|line| line.split_whitespace().last())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

pub fn cpu_model() -> Option<String> {
    let output = Command::new("wmic")
        .args(["cpu", "get", "Name"])
        .output()
        .ok()?;
    let result = String::from_utf8_lossy(&output.stdout);
    result
        .lines()
        .nth(1)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok().filter(|s| !s.is_empty())
}
