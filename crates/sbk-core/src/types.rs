use std::path::PathBuf;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::{SbkError, SbkResult};

/// How often a job fires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
}

/// A named, scheduled backup recipe stored under `[[jobs]]`.
///
/// The engine never sees this type; front ends unpack it into the
/// arguments of `run_backup`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub destination: PathBuf,
    /// Stored in plaintext in the config file (see `config_file_mode_check`)
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub frequency: Frequency,
    /// Local wall-clock time, `HH:MM`
    #[serde(default = "default_time")]
    pub time: String,
    /// Weekday name, only used for weekly jobs
    #[serde(default = "default_day")]
    pub day: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub sources: Vec<PathBuf>,
}

fn default_time() -> String {
    "10:00".into()
}

fn default_day() -> String {
    "Monday".into()
}

fn default_enabled() -> bool {
    true
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("destination", &self.destination)
            .field("password", &"[REDACTED]")
            .field("frequency", &self.frequency)
            .field("time", &self.time)
            .field("day", &self.day)
            .field("enabled", &self.enabled)
            .field("sources", &self.sources)
            .finish()
    }
}

impl Job {
    /// Five-field cron expression (`minute hour dom month dow`) for this job.
    ///
    /// Unknown weekday names fall back to Monday.
    pub fn cron_expression(&self) -> SbkResult<String> {
        let (hour, minute) = parse_time(&self.time)?;
        Ok(match self.frequency {
            Frequency::Daily => format!("{minute} {hour} * * *"),
            Frequency::Weekly => {
                let dow = weekday_number(&self.day).unwrap_or(1);
                format!("{minute} {hour} * * {dow}")
            }
        })
    }
}

fn parse_time(time: &str) -> SbkResult<(u8, u8)> {
    let invalid = || SbkError::Config(format!("invalid job time {time:?} (expected HH:MM)"));
    let (h, m) = time.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u8 = h.parse().map_err(|_| invalid())?;
    let minute: u8 = m.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// Cron day-of-week number, Sunday = 0.
fn weekday_number(day: &str) -> Option<u8> {
    const DAYS: [&str; 7] = [
        "sunday",
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
    ];
    let day = day.trim().to_ascii_lowercase();
    DAYS.iter().position(|d| *d == day).map(|i| i as u8)
}

/// Output file name for a backup of `name` taken at `at`.
///
/// Keeps alphanumerics, spaces, `_` and `-`, so a job name can never smuggle
/// a path separator into the destination directory.
pub fn backup_file_name<Tz: TimeZone>(name: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let sanitized = sanitized.trim_end();
    let stem = if sanitized.is_empty() { "backup" } else { sanitized };
    format!("{stem}_{}.sbk", at.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(frequency: Frequency, time: &str, day: &str) -> Job {
        Job {
            name: "Daily".into(),
            destination: PathBuf::from("/tmp/out"),
            password: "pw".into(),
            frequency,
            time: time.into(),
            day: day.into(),
            enabled: true,
            sources: vec![PathBuf::from("/home/user/notes.txt")],
        }
    }

    #[test]
    fn test_cron_daily() {
        let j = job(Frequency::Daily, "10:30", "Monday");
        assert_eq!(j.cron_expression().unwrap(), "30 10 * * *");
    }

    #[test]
    fn test_cron_weekly() {
        let j = job(Frequency::Weekly, "09:05", "Friday");
        assert_eq!(j.cron_expression().unwrap(), "5 9 * * 5");

        let j = job(Frequency::Weekly, "23:59", "sunday");
        assert_eq!(j.cron_expression().unwrap(), "59 23 * * 0");
    }

    #[test]
    fn test_cron_unknown_day_falls_back_to_monday() {
        let j = job(Frequency::Weekly, "08:00", "Caturday");
        assert_eq!(j.cron_expression().unwrap(), "0 8 * * 1");
    }

    #[test]
    fn test_cron_rejects_bad_time() {
        for bad in ["", "10", "25:00", "10:60", "ab:cd"] {
            let j = job(Frequency::Daily, bad, "Monday");
            assert!(j.cron_expression().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_backup_file_name_sanitizes() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(backup_file_name("Daily", &at), "Daily_20240307_140509.sbk");
        assert_eq!(
            backup_file_name("../etc/passwd ", &at),
            "etcpasswd_20240307_140509.sbk"
        );
        assert_eq!(backup_file_name("///", &at), "backup_20240307_140509.sbk");
    }

    #[test]
    fn test_debug_redacts_password() {
        let j = job(Frequency::Daily, "10:00", "Monday");
        let rendered = format!("{j:?}");
        assert!(!rendered.contains("pw\""));
        assert!(rendered.contains("[REDACTED]"));
    }
}
