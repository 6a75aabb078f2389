use crate::error::SchedulerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum TaskKind {
    Update,
    Cleanup,
    Report,
}

/// Day of week a task runs on, stored as -1 (every day) or 0 (Sunday) to 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum DaySelector {
    EveryDay,
    Day(u8),
}

impl DaySelector {
    pub const EVERY_DAY: i8 = -1;

    /// Cron day-of-week field.
    pub fn cron_field(&self) -> String {
        match self {
            DaySelector::EveryDay => "*".to_string(),
            DaySelector::Day(d) => d.to_string(),
        }
    }

    pub fn from_cron_field(field: &str) -> Result<Self, SchedulerError> {
        if field == "*" {
            return Ok(DaySelector::EveryDay);
        }
        let day = field
            .parse::<i8>()
            .map_err(|_| SchedulerError::Parse(format!("day-of-week field {:?}", field)))?;
        // cron accepts 7 as Sunday
        let day = if day == 7 { 0 } else { day };
        DaySelector::try_from(day).map_err(|e| SchedulerError::Parse(e.to_string()))
    }

    pub fn label(&self) -> &'static str {
        match self {
            DaySelector::EveryDay => "Every day",
            DaySelector::Day(d) => DAY_NAMES.get(*d as usize).copied().unwrap_or("Unknown"),
        }
    }

    // Sort key, every-day tasks first
    fn ordinal(&self) -> i8 {
        i8::from(*self)
    }
}

impl TryFrom<i8> for DaySelector {
    type Error = SchedulerError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            DaySelector::EVERY_DAY => Ok(DaySelector::EveryDay),
            0..=6 => Ok(DaySelector::Day(value as u8)),
            _ => Err(SchedulerError::InvalidTask(format!(
                "day of week must be -1 or 0-6, got {}",
                value
            ))),
        }
    }
}

impl From<DaySelector> for i8 {
    fn from(day: DaySelector) -> i8 {
        match day {
            DaySelector::EveryDay => DaySelector::EVERY_DAY,
            DaySelector::Day(d) => d as i8,
        }
    }
}

impl fmt::Display for DaySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A recurring maintenance task. Triggering is left to the host scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub kind: TaskKind,
    pub name: String,
    pub description: String,
    pub day: DaySelector,
    pub hour: u8,
    pub minute: u8,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    /// New enabled task with a fresh identifier.
    pub fn new(
        kind: TaskKind,
        name: &str,
        description: &str,
        day: DaySelector,
        hour: u8,
        minute: u8,
    ) -> Result<Self, SchedulerError> {
        let task = Self {
            id: Uuid::new_v4().to_string(),
            kind,
            name: name.to_string(),
            description: description.to_string(),
            day,
            hour,
            minute,
            enabled: true,
            created_at: Utc::now(),
            last_run: None,
        };
        task.validate()?;
        Ok(task)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.id.trim().is_empty() {
            return Err(SchedulerError::InvalidTask("empty id".to_string()));
        }
        if self.hour > 23 {
            return Err(SchedulerError::InvalidTask(format!(
                "hour must be 0-23, got {}",
                self.hour
            )));
        }
        if self.minute > 59 {
            return Err(SchedulerError::InvalidTask(format!(
                "minute must be 0-59, got {}",
                self.minute
            )));
        }
        if let DaySelector::Day(d) = self.day {
            if d > 6 {
                return Err(SchedulerError::InvalidTask(format!(
                    "day of week must be 0-6, got {}",
                    d
                )));
            }
        }
        Ok(())
    }

    /// `minute hour * * day-of-week`
    pub fn cron_expression(&self) -> String {
        format!("{} {} * * {}", self.minute, self.hour, self.day.cron_field())
    }

    pub fn day_label(&self) -> &'static str {
        self.day.label()
    }

    pub fn time_label(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }
}

/// Orders tasks by day of week then hour, as every backend lists them.
pub fn sort_tasks(tasks: &mut [ScheduledTask]) {
    tasks.sort_by(|a, b| {
        a.day
            .ordinal()
            .cmp(&b.day.ordinal())
            .then_with(|| a.hour.cmp(&b.hour))
            .then_with(|| a.minute.cmp(&b.minute))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_validation() {
        let task = ScheduledTask::new(TaskKind::Update, "Weekly", "", DaySelector::Day(1), 3, 30).unwrap();
        assert!(task.enabled);
        assert!(Uuid::parse_str(&task.id).is_ok());

        assert!(ScheduledTask::new(TaskKind::Update, "", "", DaySelector::Day(1), 24, 0).is_err());
        assert!(ScheduledTask::new(TaskKind::Update, "", "", DaySelector::Day(1), 0, 60).is_err());
        assert!(ScheduledTask::new(TaskKind::Update, "", "", DaySelector::Day(7), 0, 0).is_err());
    }

    #[test]
    fn test_cron_expression() {
        let mut task = ScheduledTask::new(TaskKind::Cleanup, "c", "", DaySelector::Day(0), 4, 5).unwrap();
        assert_eq!(task.cron_expression(), "5 4 * * 0");
        task.day = DaySelector::EveryDay;
        assert_eq!(task.cron_expression(), "5 4 * * *");
    }

    #[test]
    fn test_day_selector_serialization() {
        assert_eq!(serde_json::to_string(&DaySelector::EveryDay).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&DaySelector::Day(6)).unwrap(), "6");
        assert_eq!(serde_json::from_str::<DaySelector>("-1").unwrap(), DaySelector::EveryDay);
        assert!(serde_json::from_str::<DaySelector>("7").is_err());
        assert!(serde_json::from_str::<DaySelector>("-2").is_err());
    }

    #[test]
    fn test_day_selector_cron_field() {
        assert_eq!(DaySelector::from_cron_field("*").unwrap(), DaySelector::EveryDay);
        assert_eq!(DaySelector::from_cron_field("3").unwrap(), DaySelector::Day(3));
        assert_eq!(DaySelector::from_cron_field("7").unwrap(), DaySelector::Day(0));
        assert!(DaySelector::from_cron_field("mon").is_err());
    }

    #[test]
    fn test_labels() {
        let task = ScheduledTask::new(TaskKind::Report, "r", "", DaySelector::Day(1), 9, 5).unwrap();
        assert_eq!(task.day_label(), "Monday");
        assert_eq!(task.time_label(), "09:05");
        assert_eq!(DaySelector::EveryDay.to_string(), "Every day");
    }

    #[test]
    fn test_sort_tasks() {
        let mk = |day, hour| ScheduledTask::new(TaskKind::Update, "t", "", day, hour, 0).unwrap();
        let mut tasks = vec![
            mk(DaySelector::Day(2), 1),
            mk(DaySelector::Day(0), 8),
            mk(DaySelector::EveryDay, 12),
            mk(DaySelector::Day(0), 3),
        ];
        sort_tasks(&mut tasks);
        let order: Vec<(i8, u8)> = tasks.iter().map(|t| (i8::from(t.day), t.hour)).collect();
        assert_eq!(order, vec![(-1, 12), (0, 3), (0, 8), (2, 1)]);
    }
}
