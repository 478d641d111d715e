use crate::channel::deliver_report;
use crate::report::ReportGenerator;
use crate::settings::{Settings, SettingsStore};
use crate::telegram::MessagingBackend;
use crate::track_store::TrackStore;
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub const CHECK_PERIOD: Duration = Duration::from_secs(60);

/// Once-a-day jobs: the daily report and the retention sweep.
pub struct DailyScheduler {
    settings: Arc<SettingsStore>,
    store: Arc<TrackStore>,
    reports: Arc<ReportGenerator>,
    messenger: Arc<dyn MessagingBackend>,
    last_report: Option<NaiveDate>,
    last_cleanup: Option<NaiveDate>,
}

impl DailyScheduler {
    pub fn new(
        settings: Arc<SettingsStore>,
        store: Arc<TrackStore>,
        reports: Arc<ReportGenerator>,
        messenger: Arc<dyn MessagingBackend>,
    ) -> Self {
        Self {
            settings,
            store,
            reports,
            messenger,
            last_report: None,
            last_cleanup: None,
        }
    }

    /// Date to report on at `now`, if the report is due and not yet sent today.
    pub fn report_due(&self, settings: &Settings, now: NaiveDateTime) -> Option<NaiveDate> {
        let today = now.date();
        let due = settings.daily_reports_enabled
            && settings.credentials().is_some()
            && now.hour() == settings.report_hour
            && self.last_report != Some(today);
        due.then_some(today)
    }

    pub fn cleanup_due(&self, settings: &Settings, now: NaiveDateTime) -> bool {
        settings.retention_days > 0 && self.last_cleanup != Some(now.date())
    }

    pub async fn check(&mut self, now: NaiveDateTime) {
        let settings = self.settings.snapshot();

        if self.cleanup_due(&settings, now) {
            let deleted = self
                .store
                .cleanup_relative_to(now.date(), settings.retention_days);
            if deleted > 0 {
                log::info!(
                    "Retention sweep removed {} day files older than {} days",
                    deleted,
                    settings.retention_days
                );
            }
            self.last_cleanup = Some(now.date());
        }

        if let Some(date) = self.report_due(&settings, now) {
            // marked before sending: a failed upload is not retried within the day
            self.last_report = Some(date);
            if let Some(creds) = settings.credentials() {
                log::info!("Sending daily report for {}", date);
                deliver_report(&self.reports, self.messenger.as_ref(), &creds, date).await;
            }
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(CHECK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check(Local::now().naive_local()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::debug!("Daily scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::testing::{Outbound, RecordingBackend};
    use crate::types::{LocationSample, RawFix, UpdateType};
    use tempfile::TempDir;

    fn at(date: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
        date.and_hms_opt(hour, minute, 0).unwrap()
    }

    fn setup(tmp: &TempDir) -> (DailyScheduler, Arc<SettingsStore>, Arc<TrackStore>, Arc<RecordingBackend>) {
        let settings = Arc::new(SettingsStore::load(tmp.path().join("settings.json")));
        settings
            .update(|s| {
                s.bot_token = "123456:ABCDEFGHIJ".into();
                s.chat_id = "42".into();
                s.daily_reports_enabled = true;
                s.report_hour = 21;
            })
            .unwrap();
        let store = Arc::new(TrackStore::open(tmp.path().join("tracks")).unwrap());
        let reports = Arc::new(ReportGenerator::new(store.clone(), "dev", "0.1.0"));
        let backend = Arc::new(RecordingBackend::default());
        let scheduler = DailyScheduler::new(settings.clone(), store.clone(), reports, backend.clone());
        (scheduler, settings, store, backend)
    }

    #[tokio::test]
    async fn test_daily_report_once_at_hour() {
        let tmp = TempDir::new().unwrap();
        let (mut scheduler, _settings, store, backend) = setup(&tmp);
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let sample = LocationSample::from_fix(&RawFix::new(48.2, 16.37), UpdateType::Automatic, None);
        store.append_for_date(day, sample).unwrap();

        scheduler.check(at(day, 20, 59)).await;
        assert!(backend.sent().is_empty());

        scheduler.check(at(day, 21, 0)).await;
        scheduler.check(at(day, 21, 1)).await;
        let documents = backend
            .sent()
            .into_iter()
            .filter(|o| matches!(o, Outbound::Document { .. }))
            .count();
        assert_eq!(documents, 1);
    }

    #[tokio::test]
    async fn test_disabled_daily_report() {
        let tmp = TempDir::new().unwrap();
        let (mut scheduler, settings, _store, backend) = setup(&tmp);
        settings.update(|s| s.daily_reports_enabled = false).unwrap();

        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        scheduler.check(at(day, 21, 0)).await;
        assert!(backend.sent().is_empty());
    }

    #[tokio::test]
    async fn test_retention_sweep_once_per_day() {
        let tmp = TempDir::new().unwrap();
        let (mut scheduler, settings, store, _backend) = setup(&tmp);
        settings.update(|s| s.retention_days = 7).unwrap();

        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let old = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let recent = NaiveDate::from_ymd_opt(2025, 6, 5).unwrap();
        for date in [old, recent] {
            let sample = LocationSample::from_fix(&RawFix::new(1.0, 1.0), UpdateType::Automatic, None);
            store.append_for_date(date, sample).unwrap();
        }

        scheduler.check(at(today, 3, 0)).await;
        assert_eq!(store.list_available_dates(), vec![recent]);
        assert!(!scheduler.cleanup_due(&settings.snapshot(), at(today, 4, 0)));
    }

    #[test]
    fn test_zero_retention_disables_sweep() {
        let tmp = TempDir::new().unwrap();
        let (scheduler, settings, _store, _backend) = setup(&tmp);
        settings.update(|s| s.retention_days = 0).unwrap();
        let now = at(NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(), 3, 0);
        assert!(!scheduler.cleanup_due(&settings.snapshot(), now));
    }
}
