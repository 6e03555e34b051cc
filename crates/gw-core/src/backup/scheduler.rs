//! Daily and weekly backup schedule.
//!
//! The scheduler loop asks [`BackupSchedule::due`] once per tick. Each
//! calendar day fires at most one job: on the weekly day the full weekly
//! backup runs instead of the daily one.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use gw_config::{parse_daily_time, BackupSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledJob {
    Daily,
    Weekly,
}

#[derive(Debug, Clone)]
pub struct BackupSchedule {
    at: NaiveTime,
    weekly_day: Weekday,
    last_run: Option<NaiveDate>,
}

impl BackupSchedule {
    /// Build from settings. A slot that has already passed today is
    /// treated as done so a restart does not trigger a backup at once.
    pub fn new(settings: &BackupSettings, now: NaiveDateTime) -> Result<Self, String> {
        let (hour, minute) = parse_daily_time(&settings.daily_time)
            .ok_or_else(|| format!("invalid daily_time '{}'", settings.daily_time))?;
        let at = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| format!("invalid daily_time '{}'", settings.daily_time))?;
        let weekly_day: Weekday = settings
            .weekly_day
            .parse()
            .map_err(|_| format!("invalid weekly_day '{}'", settings.weekly_day))?;

        let last_run = (now.time() >= at).then(|| now.date());
        Ok(Self {
            at,
            weekly_day,
            last_run,
        })
    }

    /// The job due at `now`, if any. Marks it as run.
    pub fn due(&mut self, now: NaiveDateTime) -> Option<ScheduledJob> {
        let today = now.date();
        if now.time() < self.at || self.last_run == Some(today) {
            return None;
        }
        self.last_run = Some(today);
        if chrono::Datelike::weekday(&today) == self.weekly_day {
            Some(ScheduledJob::Weekly)
        } else {
            Some(ScheduledJob::Daily)
        }
    }
}
