use crate::commands::{self, Command, HELP_TEXT};
use crate::cooldown::Cooldown;
use crate::error::BeaconError;
use crate::report::ReportGenerator;
use crate::settings::{Credentials, SettingsStore};
use crate::telegram::{MessagingBackend, Update};
use crate::track_store::TrackStore;
use crate::tracker::TrackerControl;
use chrono::{Days, Local, NaiveDate};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub const INTERVAL_COOLDOWN: Duration = Duration::from_secs(30);
pub const STARTED_COOLDOWN: Duration = Duration::from_secs(60);
pub const MAX_LISTED_FILES: usize = 10;

/// Last processed update id, tied to the bot token it was primed for.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandCursor {
    pub last_update_id: Option<i64>,
    pub primed_for: Option<String>,
}

impl CommandCursor {
    pub fn next_offset(&self) -> i64 {
        self.last_update_id.map_or(0, |id| id + 1)
    }

    fn advance(&mut self, update_id: i64) {
        self.last_update_id = Some(self.last_update_id.map_or(update_id, |id| id.max(update_id)));
    }
}

/// Remote control over the messaging backend.
pub struct CommandChannel {
    settings: Arc<SettingsStore>,
    store: Arc<TrackStore>,
    reports: Arc<ReportGenerator>,
    tracker: Arc<dyn TrackerControl>,
    messenger: Arc<dyn MessagingBackend>,
    cursor: Mutex<CommandCursor>,
    interval_cooldown: Cooldown,
    started_cooldown: Cooldown,
    poll_period: Duration,
}

impl CommandChannel {
    pub fn new(
        settings: Arc<SettingsStore>,
        store: Arc<TrackStore>,
        reports: Arc<ReportGenerator>,
        tracker: Arc<dyn TrackerControl>,
        messenger: Arc<dyn MessagingBackend>,
        poll_period: Duration,
    ) -> Self {
        Self {
            settings,
            store,
            reports,
            tracker,
            messenger,
            cursor: Mutex::new(CommandCursor::default()),
            interval_cooldown: Cooldown::new("interval", INTERVAL_COOLDOWN),
            started_cooldown: Cooldown::new("started", STARTED_COOLDOWN),
            poll_period,
        }
    }

    pub fn cursor(&self) -> CommandCursor {
        self.cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn with_cursor<R>(&self, f: impl FnOnce(&mut CommandCursor) -> R) -> R {
        let mut guard = self
            .cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Poll every `poll_period` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.announce_started().await;

        let mut ticker = interval(self.poll_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("Command channel polling every {:?}", self.poll_period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("Command channel stopped");
    }

    /// "Service started" notice, at most once per cooldown period.
    ///
    /// The engine calls this once per process. The cooldown covers a host
    /// that runs the same channel a second time, or restarts its task after
    /// a crash, so the chat does not get a burst of duplicate notices.
    pub async fn announce_started(&self) -> bool {
        let Some(creds) = self.settings.credentials() else {
            return false;
        };
        if self.started_cooldown.try_acquire().is_err() {
            log::debug!("Skipping duplicate start notice");
            return false;
        }
        let text = format!(
            "📍 Location service started\nDevice time: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        self.reply(&creds, &text).await;
        true
    }

    /// Skip everything sent before now by moving the cursor to the newest update.
    async fn prime(&self, bot_token: &str) -> bool {
        match self.messenger.get_updates(bot_token, -1).await {
            Ok(updates) => {
                let newest = updates.iter().map(|u| u.update_id).max();
                self.with_cursor(|cursor| {
                    cursor.last_update_id = newest;
                    cursor.primed_for = Some(bot_token.to_string());
                });
                log::info!("Command cursor primed at {:?}", newest);
                true
            }
            Err(e) => {
                log::warn!("Failed to prime command cursor: {}", e);
                false
            }
        }
    }

    /// One poll cycle. Returns the number of commands dispatched.
    pub async fn poll_once(&self) -> usize {
        let Some(creds) = self.settings.credentials() else {
            return 0;
        };

        let primed = self.with_cursor(|c| c.primed_for.as_deref() == Some(creds.bot_token.as_str()));
        if !primed && !self.prime(&creds.bot_token).await {
            return 0;
        }

        let offset = self.with_cursor(|c| c.next_offset());
        let updates = match self.messenger.get_updates(&creds.bot_token, offset).await {
            Ok(updates) => updates,
            Err(e) => {
                log::warn!("Polling for commands failed: {}", e);
                return 0;
            }
        };

        let mut dispatched = 0;
        for update in updates {
            self.with_cursor(|c| c.advance(update.update_id));
            if let Some(command) = self.authorized_command(&update, &creds) {
                log::info!("Command {:?} (update {})", command, update.update_id);
                self.execute(command, &creds).await;
                dispatched += 1;
            }
        }
        dispatched
    }

    fn authorized_command(&self, update: &Update, creds: &Credentials) -> Option<Command> {
        let message = update.message.as_ref()?;
        if message.chat.id.to_string() != creds.chat_id {
            log::debug!("Ignoring update {} from chat {}", update.update_id, message.chat.id);
            return None;
        }
        Command::parse(message.text.as_deref()?)
    }

    async fn reply(&self, creds: &Credentials, text: &str) {
        if let Err(e) = self.messenger.send_message(creds, text).await {
            log::warn!("Reply failed: {}", e);
        }
    }

    async fn reply_error(&self, creds: &Credentials, error: BeaconError) {
        self.reply(creds, &error.user_message()).await;
    }

    pub async fn execute(&self, command: Command, creds: &Credentials) {
        let today = Local::now().date_naive();
        match command {
            Command::Interval(arg) => self.set_interval(arg.as_deref(), creds).await,
            Command::Status => {
                let text = self.status_text();
                self.reply(creds, &text).await;
            }
            Command::Start => match self.tracker.start().await {
                Ok(()) => self.reply(creds, "Location tracking started").await,
                Err(e) => self.reply_error(creds, e).await,
            },
            Command::Stop => match self.tracker.stop().await {
                Ok(()) => self.reply(creds, "Location tracking stopped").await,
                Err(e) => self.reply_error(creds, e).await,
            },
            Command::Restart => match self.tracker.restart().await {
                Ok(()) => self.reply(creds, "Location tracking restarted").await,
                Err(e) => self.reply_error(creds, e).await,
            },
            Command::Token(arg) => {
                let result = commands::parse_required(arg.as_deref(), "bot token")
                    .and_then(|token| self.settings.update(|s| s.bot_token = token));
                match result {
                    Ok(_) => {
                        self.reply(
                            creds,
                            "Bot token updated. Use /restart to apply it to location updates.",
                        )
                        .await
                    }
                    Err(e) => self.reply_error(creds, e).await,
                }
            }
            Command::ChatId(arg) => {
                let result = commands::parse_required(arg.as_deref(), "chat id")
                    .and_then(|chat_id| self.settings.update(|s| s.chat_id = chat_id));
                match result {
                    Ok(settings) => {
                        let text = format!(
                            "Chat ID updated to {}. Use /restart to apply it to location updates.",
                            settings.chat_id
                        );
                        self.reply(creds, &text).await
                    }
                    Err(e) => self.reply_error(creds, e).await,
                }
            }
            Command::Report(arg) => match commands::parse_report_date(arg.as_deref(), today) {
                Ok(date) => self.send_report(creds, date).await,
                Err(e) => self.reply_error(creds, e).await,
            },
            Command::Today => self.send_report(creds, today).await,
            Command::Yesterday => {
                let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
                self.send_report(creds, yesterday).await
            }
            Command::Files => {
                let text = files_text(&self.store.list_day_files());
                self.reply(creds, &text).await;
            }
            Command::Cleanup(arg) => match commands::parse_cleanup_days(arg.as_deref()) {
                Ok(days) => {
                    let before = self.store.file_count();
                    let deleted = self.store.cleanup(days);
                    let after = self.store.file_count();
                    let text = format!(
                        "Cleanup complete (kept last {} days)\nFiles before: {}\nFiles after: {}\nDeleted: {}",
                        days, before, after, deleted
                    );
                    self.reply(creds, &text).await;
                }
                Err(e) => self.reply_error(creds, e).await,
            },
            Command::Daily(arg) => {
                let result = commands::parse_daily(arg.as_deref()).and_then(|(enabled, hour)| {
                    self.settings.update(|s| {
                        s.daily_reports_enabled = enabled;
                        if let Some(hour) = hour {
                            s.report_hour = hour;
                        }
                    })
                });
                match result {
                    Ok(settings) if settings.daily_reports_enabled => {
                        let text = format!("Daily reports enabled at {:02}:00", settings.report_hour);
                        self.reply(creds, &text).await
                    }
                    Ok(_) => self.reply(creds, "Daily reports disabled").await,
                    Err(e) => self.reply_error(creds, e).await,
                }
            }
            Command::Retention(arg) => {
                let result = commands::parse_retention_days(arg.as_deref())
                    .and_then(|days| self.settings.update(|s| s.retention_days = days));
                match result {
                    Ok(settings) if settings.retention_days == 0 => {
                        self.reply(creds, "Automatic cleanup disabled").await
                    }
                    Ok(settings) => {
                        let text = format!("Retention set to {} days", settings.retention_days);
                        self.reply(creds, &text).await
                    }
                    Err(e) => self.reply_error(creds, e).await,
                }
            }
            Command::Help => self.reply(creds, HELP_TEXT).await,
        }
    }

    async fn set_interval(&self, arg: Option<&str>, creds: &Credentials) {
        let interval_ms = match commands::parse_interval(arg) {
            Ok(ms) => ms,
            Err(e) => return self.reply_error(creds, e).await,
        };

        let wait = self.interval_cooldown.remaining();
        if !wait.is_zero() {
            let text = format!(
                "Interval was changed recently. Please wait {} s before changing it again.",
                wait.as_secs().max(1)
            );
            return self.reply(creds, &text).await;
        }

        match self.settings.update(|s| s.interval_ms = interval_ms) {
            Ok(_) => {
                if let Err(wait) = self.interval_cooldown.try_acquire() {
                    log::warn!("Interval cooldown re-armed concurrently ({:?} left)", wait);
                }
                self.tracker.reconfigure_interval(interval_ms);
                let text = format!("Interval updated to {} ms", interval_ms);
                self.reply(creds, &text).await;
            }
            Err(e) => self.reply_error(creds, e).await,
        }
    }

    async fn send_report(&self, creds: &Credentials, date: NaiveDate) {
        let text = format!("Generating report for {}...", date.format("%Y-%m-%d"));
        self.reply(creds, &text).await;
        deliver_report(&self.reports, self.messenger.as_ref(), creds, date).await;
    }

    pub fn status_text(&self) -> String {
        let settings = self.settings.snapshot();
        let tracking = if self.tracker.is_running() {
            format!("active ({:?})", self.tracker.mode()).to_lowercase()
        } else {
            "inactive".to_string()
        };
        let daily = if settings.daily_reports_enabled {
            format!("on at {:02}:00", settings.report_hour)
        } else {
            "off".to_string()
        };
        let chat_id = if settings.chat_id.is_empty() {
            "(not set)".to_string()
        } else {
            settings.chat_id.clone()
        };

        format!(
            "📍 Status\nTracking: {}\nBot token: {}\nChat ID: {}\nInterval: {} ms\nDay files: {}\nDaily report: {}\nRetention: {} days\nDevice time: {}",
            tracking,
            settings.masked_token(),
            chat_id,
            settings.interval_ms,
            self.store.file_count(),
            daily,
            settings.retention_days,
            Local::now().format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

/// Summary message followed by the GeoJSON attachment, or a "no data" notice.
///
/// Returns whether a document was sent.
pub async fn deliver_report(
    reports: &ReportGenerator,
    messenger: &dyn MessagingBackend,
    creds: &Credentials,
    date: NaiveDate,
) -> bool {
    let day = date.format("%Y-%m-%d");
    let Some(doc) = reports.generate(date) else {
        if let Err(e) = messenger
            .send_message(creds, &format!("No location data for {}", day))
            .await
        {
            log::warn!("Reply failed: {}", e);
        }
        return false;
    };

    if let Err(e) = messenger.send_message(creds, &doc.summary()).await {
        log::warn!("Report summary failed: {}", e);
    }

    let bytes = match doc.to_json_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!("Failed to serialize report for {}: {}", day, e);
            return false;
        }
    };
    let caption = format!("Track report {}", day);
    match messenger
        .send_document(creds, &doc.file_name(), bytes, &caption)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Report upload failed: {}", e);
            false
        }
    }
}

fn files_text(names: &[String]) -> String {
    if names.is_empty() {
        return "No data files found".to_string();
    }
    let mut text = format!("Data files ({}):", names.len());
    for name in names.iter().take(MAX_LISTED_FILES) {
        text.push_str("\n• ");
        text.push_str(name);
    }
    if names.len() > MAX_LISTED_FILES {
        text.push_str(&format!("\n... and {} more", names.len() - MAX_LISTED_FILES));
    }
    text
}
