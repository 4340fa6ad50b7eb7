//! Time-varying overlay readings, refreshed once a second.
//!
//! The refresher runs independently of the render loop; ticks only read the
//! latest value out of the watch channel.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);
pub const BATTERY_UNAVAILABLE: &str = "Battery: Not available";
const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readings {
    pub datetime: String,
    pub battery: String,
}

impl Readings {
    pub fn now() -> Self {
        Self {
            datetime: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            battery: battery_label(Path::new(POWER_SUPPLY_DIR)),
        }
    }
}

/// Publishes fresh `Readings` until dropped.
pub struct ReadingsFeed {
    rx: watch::Receiver<Readings>,
    task: JoinHandle<()>,
}

impl ReadingsFeed {
    pub fn spawn() -> Self {
        let (tx, rx) = watch::channel(Readings::now());
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                interval.tick().await;
                if tx.send(Readings::now()).is_err() {
                    break;
                }
            }
        });
        Self { rx, task }
    }

    pub fn latest(&self) -> Readings {
        self.rx.borrow().clone()
    }
}

impl Drop for ReadingsFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// "Battery: NN%" from the first battery under `power_supply_dir`.
pub fn battery_label(power_supply_dir: &Path) -> String {
    battery_capacity(power_supply_dir)
        .map(|level| format!("Battery: {}%", level))
        .unwrap_or_else(|| BATTERY_UNAVAILABLE.to_string())
}

fn battery_capacity(dir: &Path) -> Option<u8> {
    let mut batteries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("BAT"))
        })
        .collect();
    batteries.sort();

    batteries.iter().find_map(|bat| {
        std::fs::read_to_string(bat.join("capacity"))
            .ok()
            .and_then(|s| s.trim().parse::<u8>().ok())
            .map(|level| level.min(100))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_label_reads_capacity() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("AC")).unwrap();
        let bat = dir.path().join("BAT0");
        std::fs::create_dir(&bat).unwrap();
        std::fs::write(bat.join("capacity"), "87\n").unwrap();

        assert_eq!(battery_label(dir.path()), "Battery: 87%");
    }

    #[test]
    fn test_battery_label_without_battery() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(battery_label(dir.path()), BATTERY_UNAVAILABLE);
        assert_eq!(
            battery_label(&dir.path().join("missing")),
            BATTERY_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_feed_publishes_readings() {
        let feed = ReadingsFeed::spawn();
        let readings = feed.latest();
        assert_eq!(readings.datetime.len(), "2026-10-19 12:00:00".len());
        assert!(readings.battery.starts_with("Battery: "));
    }
}
