use chrono::{Local, NaiveDateTime, TimeZone};
use crate::error::ConfigError;

/// Index of the primary input, used whenever no window matches.
pub const DEFAULT_SOURCE: usize = 0;

const WINDOW_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A half-open `[start_ms, end_ms)` wall-clock window during which
/// `source_index` feeds the video decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTask {
    pub source_index: usize,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl ScheduledTask {
    pub fn new(source_index: usize, start_ms: i64, end_ms: i64) -> Self {
        Self {
            source_index,
            start_ms,
            end_ms,
        }
    }

    /// Parses a window given as local `YYYY-MM-DD HH:MM:SS` times.
    pub fn from_local_times(source_index: usize, start: &str, end: &str) -> Result<Self, ConfigError> {
        let start_ms = parse_local(start)?;
        let end_ms = parse_local(end)?;
        if end_ms <= start_ms {
            return Err(ConfigError::InvalidSwitchWindow(format!("{start} .. {end}")));
        }
        Ok(Self::new(source_index, start_ms, end_ms))
    }

    pub fn contains(&self, now_ms: i64) -> bool {
        self.start_ms <= now_ms && now_ms < self.end_ms
    }
}

fn parse_local(text: &str) -> Result<i64, ConfigError> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), WINDOW_FORMAT)
        .map_err(|_| ConfigError::InvalidSwitchWindow(text.to_string()))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.timestamp_millis())
        .ok_or_else(|| ConfigError::InvalidSwitchWindow(text.to_string()))
}

/// Result of a source lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSelection {
    Scheduled(usize),
    /// No window covers the instant; the primary input applies.
    Default,
}

impl SourceSelection {
    pub fn index(self) -> usize {
        match self {
            SourceSelection::Scheduled(index) => index,
            SourceSelection::Default => DEFAULT_SOURCE,
        }
    }

    pub fn is_found(self) -> bool {
        matches!(self, SourceSelection::Scheduled(_))
    }
}

/// First task, in list order, whose window contains `now_ms`.
pub fn current_source(tasks: &[ScheduledTask], now_ms: i64) -> SourceSelection {
    tasks
        .iter()
        .find(|task| task.contains(now_ms))
        .map_or(SourceSelection::Default, |task| {
            SourceSelection::Scheduled(task.source_index)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_half_open() {
        let tasks = [ScheduledTask::new(1, 10, 20)];
        assert_eq!(current_source(&tasks, 9), SourceSelection::Default);
        assert_eq!(current_source(&tasks, 10), SourceSelection::Scheduled(1));
        assert_eq!(current_source(&tasks, 15).index(), 1);
        assert_eq!(current_source(&tasks, 20), SourceSelection::Default);
        assert_eq!(current_source(&tasks, 20).index(), DEFAULT_SOURCE);
    }

    #[test]
    fn test_first_match_wins_on_overlap() {
        let tasks = [ScheduledTask::new(2, 0, 100), ScheduledTask::new(3, 50, 150)];
        assert_eq!(current_source(&tasks, 60), SourceSelection::Scheduled(2));
        assert_eq!(current_source(&tasks, 120), SourceSelection::Scheduled(3));
        assert!(!current_source(&tasks, 150).is_found());
    }

    #[test]
    fn test_empty_schedule_selects_primary() {
        assert_eq!(current_source(&[], 0), SourceSelection::Default);
    }

    #[test]
    fn test_parse_local_window() {
        let task = ScheduledTask::from_local_times(1, "2024-03-01 10:00:00", "2024-03-01 10:30:00").unwrap();
        assert_eq!(task.end_ms - task.start_ms, 30 * 60 * 1000);

        assert!(ScheduledTask::from_local_times(1, "2024-03-01 10:30:00", "2024-03-01 10:00:00").is_err());
        assert!(ScheduledTask::from_local_times(1, "yesterday", "2024-03-01 10:00:00").is_err());
    }
}
