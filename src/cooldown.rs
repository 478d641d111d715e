use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Minimum elapsed-time gate between two accepted actions.
///
/// Only accepted attempts arm the gate; a rejected attempt leaves it as is.
#[derive(Debug)]
pub struct Cooldown {
    pub name: String,
    period: Duration,
    last_accepted: Mutex<Option<Instant>>,
}

impl Cooldown {
    pub fn new(name: &str, period: Duration) -> Self {
        Cooldown {
            name: name.to_string(),
            period,
            last_accepted: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Accept and arm the gate if the period has elapsed; otherwise return
    /// the time still to wait.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut last = self
            .last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = *last {
            let elapsed = now.saturating_duration_since(previous);
            if elapsed < self.period {
                return Err(self.period - elapsed);
            }
        }

        *last = Some(now);
        Ok(())
    }

    /// Time left before the next attempt would be accepted.
    pub fn remaining(&self) -> Duration {
        let last = self
            .last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last {
            Some(previous) => self.period.saturating_sub(previous.elapsed()),
            None => Duration::ZERO,
        }
    }
}
