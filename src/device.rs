use std::fs;
use std::path::Path;

const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Device identifier for report metadata: explicit value, machine id, hostname.
pub fn resolve_device_id(explicit: Option<&str>) -> String {
    if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }

    for candidate in ["/etc/machine-id", "/var/lib/dbus/machine-id", "/etc/hostname"] {
        if let Ok(contents) = fs::read_to_string(candidate) {
            let id = contents.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }

    "unknown".to_string()
}

/// Battery charge in percent, when the host exposes one.
pub fn battery_level() -> Option<i32> {
    battery_level_in(Path::new(POWER_SUPPLY_DIR))
}

fn battery_level_in(dir: &Path) -> Option<i32> {
    let mut supplies: Vec<_> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    supplies.sort();

    supplies.iter().find_map(|supply| {
        let capacity = fs::read_to_string(supply.join("capacity")).ok()?;
        let level: i32 = capacity.trim().parse().ok()?;
        (0..=100).contains(&level).then_some(level)
    })
}
