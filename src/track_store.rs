use crate::error::BeaconResult;
use crate::types::LocationSample;
use chrono::{Days, Local, NaiveDate};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const DAY_FILE_PREFIX: &str = "locations_";
const DAY_FILE_SUFFIX: &str = ".json";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Day-partitioned sample log: one JSON array per local calendar date.
///
/// Every operation on a given day-file holds that day's lock, so appends,
/// loads and deletes of the same file never interleave. Appends rewrite the
/// whole file (read, push, write to a temp file, rename).
pub struct TrackStore {
    dir: PathBuf,
    day_locks: Mutex<HashMap<NaiveDate, Arc<Mutex<()>>>>,
}

impl TrackStore {
    /// Open (and create if needed) the day-file directory.
    pub fn open(dir: impl Into<PathBuf>) -> BeaconResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            day_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn day_file_name(date: NaiveDate) -> String {
        format!("{}{}{}", DAY_FILE_PREFIX, date.format(DATE_FORMAT), DAY_FILE_SUFFIX)
    }

    /// Inverse of [`TrackStore::day_file_name`]; `None` for anything else.
    pub fn parse_day_file_name(name: &str) -> Option<NaiveDate> {
        let stem = name
            .strip_prefix(DAY_FILE_PREFIX)?
            .strip_suffix(DAY_FILE_SUFFIX)?;
        NaiveDate::parse_from_str(stem, DATE_FORMAT).ok()
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(Self::day_file_name(date))
    }

    /// Append to today's day-file. Failures are logged and the sample dropped.
    pub fn append(&self, sample: LocationSample) {
        let today = Local::now().date_naive();
        if let Err(e) = self.append_for_date(today, sample) {
            log::error!("Dropping sample for {}: {}", today, e);
        }
    }

    /// Append to the day-file of `date`.
    pub fn append_for_date(&self, date: NaiveDate, sample: LocationSample) -> BeaconResult<()> {
        let lock = self.day_lock(date);
        let _guard = acquire(&lock);

        let path = self.path_for(date);
        let mut samples = read_day_file(&path);
        samples.push(sample);
        write_day_file(&path, &samples)
    }

    /// Samples of `date` in file order. Missing or corrupt files read as empty.
    pub fn load(&self, date: NaiveDate) -> Vec<LocationSample> {
        let lock = self.day_lock(date);
        let _guard = acquire(&lock);
        read_day_file(&self.path_for(date))
    }

    /// Dates that have a day-file, newest first.
    pub fn list_available_dates(&self) -> Vec<NaiveDate> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot list {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let mut dates: Vec<NaiveDate> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                Self::parse_day_file_name(&name.to_string_lossy())
            })
            .collect();

        dates.sort_unstable_by(|a, b| b.cmp(a));
        dates
    }

    /// Day-file names, newest first.
    pub fn list_day_files(&self) -> Vec<String> {
        self.list_available_dates()
            .into_iter()
            .map(Self::day_file_name)
            .collect()
    }

    pub fn file_count(&self) -> usize {
        self.list_available_dates().len()
    }

    /// Delete day-files strictly older than today minus `retention_days`.
    ///
    /// Returns the number of files removed.
    pub fn cleanup(&self, retention_days: u32) -> usize {
        self.cleanup_relative_to(Local::now().date_naive(), retention_days)
    }

    pub fn cleanup_relative_to(&self, today: NaiveDate, retention_days: u32) -> usize {
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(retention_days)))
            .unwrap_or(NaiveDate::MIN);

        let mut deleted = 0;
        for date in self.list_available_dates() {
            if date >= cutoff {
                continue;
            }

            let lock = self.day_lock(date);
            let _guard = acquire(&lock);
            let path = self.path_for(date);
            match fs::remove_file(&path) {
                Ok(()) => {
                    log::info!("Removed expired day-file {}", path.display());
                    deleted += 1;
                }
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        if let Ok(mut locks) = self.day_locks.lock() {
            locks.retain(|date, _| *date >= cutoff);
        }

        deleted
    }

    fn day_lock(&self, date: NaiveDate) -> Arc<Mutex<()>> {
        let mut locks = self
            .day_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(date).or_default().clone()
    }
}

fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_day_file(path: &Path) -> Vec<LocationSample> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            log::warn!("Unreadable day-file {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    serde_json::from_str(&contents).unwrap_or_else(|e| {
        log::warn!("Corrupt day-file {}: {}", path.display(), e);
        Vec::new()
    })
}

fn write_day_file(path: &Path, samples: &[LocationSample]) -> BeaconResult<()> {
    let json = serde_json::to_string_pretty(samples)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RawFix, UpdateType};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample(lat: f64, second: u32) -> LocationSample {
        LocationSample {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, second).unwrap(),
            latitude: lat,
            longitude: 13.5,
            accuracy: Some(4.5),
            speed: None,
            bearing: Some(90.0),
            altitude: None,
            battery_level: Some(77),
            update_type: UpdateType::Automatic,
            sent_to_telegram: false,
        }
    }

    #[test]
    fn test_day_file_name_round_trip() {
        let d = date(2025, 1, 9);
        let name = TrackStore::day_file_name(d);
        assert_eq!(name, "locations_2025-01-09.json");
        assert_eq!(TrackStore::parse_day_file_name(&name), Some(d));
        assert_eq!(TrackStore::parse_day_file_name("locations_2025-01-09.json.tmp"), None);
        assert_eq!(TrackStore::parse_day_file_name("locations_garbage.json"), None);
        assert_eq!(TrackStore::parse_day_file_name("settings.json"), None);
    }

    #[test]
    fn test_appends_split_by_date() {
        let tmp = TempDir::new().unwrap();
        let store = TrackStore::open(tmp.path()).unwrap();
        let day1 = date(2025, 6, 1);
        let day2 = date(2025, 6, 2);

        store.append_for_date(day1, sample(1.0, 0)).unwrap();
        store.append_for_date(day2, sample(2.0, 1)).unwrap();
        store.append_for_date(day1, sample(1.5, 2)).unwrap();
        store.append_for_date(day2, sample(2.5, 3)).unwrap();
        store.append_for_date(day1, sample(1.75, 4)).unwrap();

        let files: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(files.len(), 2);

        let first: Vec<f64> = store.load(day1).iter().map(|s| s.latitude).collect();
        let second: Vec<f64> = store.load(day2).iter().map(|s| s.latitude).collect();
        assert_eq!(first, vec![1.0, 1.5, 1.75]);
        assert_eq!(second, vec![2.0, 2.5]);
    }

    #[test]
    fn test_reload_is_element_wise_equal() {
        let tmp = TempDir::new().unwrap();
        let store = TrackStore::open(tmp.path()).unwrap();
        let day = date(2025, 6, 1);

        let mut significant = sample(52.25, 30);
        significant.update_type = UpdateType::SignificantChange;
        significant.speed = Some(1.5);
        let original = vec![sample(52.5, 10), significant, sample(52.125, 50)];

        for s in &original {
            store.append_for_date(day, s.clone()).unwrap();
        }

        assert_eq!(store.load(day), original);
    }

    #[test]
    fn test_load_missing_or_corrupt_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = TrackStore::open(tmp.path()).unwrap();
        let day = date(2025, 6, 1);

        assert!(store.load(day).is_empty());

        fs::write(store.path_for(day), "{not json").unwrap();
        assert!(store.load(day).is_empty());

        // a corrupt file is replaced by the next append
        store.append_for_date(day, sample(1.0, 0)).unwrap();
        assert_eq!(store.load(day).len(), 1);
    }

    #[test]
    fn test_list_available_dates_descending() {
        let tmp = TempDir::new().unwrap();
        let store = TrackStore::open(tmp.path()).unwrap();
        for d in [date(2025, 5, 3), date(2025, 5, 30), date(2024, 12, 31)] {
            store.append_for_date(d, sample(0.0, 0)).unwrap();
        }
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        fs::write(tmp.path().join("locations_bad.json"), "[]").unwrap();

        assert_eq!(
            store.list_available_dates(),
            vec![date(2025, 5, 30), date(2025, 5, 3), date(2024, 12, 31)]
        );
        assert_eq!(store.list_day_files()[0], "locations_2025-05-30.json");
        assert_eq!(store.file_count(), 3);
    }

    #[test]
    fn test_cleanup_strictly_older_and_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = TrackStore::open(tmp.path()).unwrap();
        let today = date(2025, 6, 30);
        for d in [date(2025, 5, 30), date(2025, 5, 31), date(2025, 6, 29), today] {
            store.append_for_date(d, sample(0.0, 0)).unwrap();
        }
        fs::write(tmp.path().join("locations_bad.json"), "[]").unwrap();

        // cutoff is 2025-05-31: only 05-30 is strictly older
        assert_eq!(store.cleanup_relative_to(today, 30), 1);
        assert_eq!(store.cleanup_relative_to(today, 30), 0);
        assert_eq!(store.file_count(), 3);
        assert!(tmp.path().join("locations_bad.json").exists());

        assert_eq!(store.cleanup_relative_to(today, 0), 2);
        assert_eq!(store.list_available_dates(), vec![today]);
    }

    #[test]
    fn test_append_today_uses_local_date() {
        let tmp = TempDir::new().unwrap();
        let store = TrackStore::open(tmp.path()).unwrap();
        let fix = RawFix::new(10.0, 20.0);
        store.append(LocationSample::from_fix(&fix, UpdateType::Automatic, None));
        assert_eq!(store.load(Local::now().date_naive()).len(), 1);
    }

    #[test]
    fn test_concurrent_appends_do_not_lose_samples() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(TrackStore::open(tmp.path()).unwrap());
        let day = date(2025, 6, 1);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..5 {
                        store.append_for_date(day, sample(i as f64, j)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load(day).len(), 40);
    }
}
