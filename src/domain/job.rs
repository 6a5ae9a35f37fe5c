use crate::error::{Result, SettlementError};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Externally visible identifier of a settlement job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| SettlementError::Validation(format!("invalid job id '{s}': {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// DONE and CANCELLED are final; nothing transitions out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "DONE" => Ok(JobStatus::Done),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(SettlementError::internal(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// Parses a `YYYY-MM-DD` pair. Empty or malformed bounds are rejected;
    /// an inverted range parses fine and is caught by [`DateRange::is_valid`].
    pub fn parse(from: &str, to: &str) -> Result<Self> {
        let (from, to) = (from.trim(), to.trim());
        if from.is_empty() || to.is_empty() {
            return Err(SettlementError::Validation(
                "from and to must be set".to_string(),
            ));
        }
        Ok(Self::new(parse_day(from)?, parse_day(to)?))
    }

    pub fn is_valid(&self) -> bool {
        self.from <= self.to
    }

    /// First instant of `from`.
    pub fn start(&self) -> DateTime<Utc> {
        self.from.and_time(NaiveTime::MIN).and_utc()
    }

    /// First instant after the whole `to` day.
    pub fn end_exclusive(&self) -> DateTime<Utc> {
        self.to
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX)
            .and_time(NaiveTime::MIN)
            .and_utc()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start() && at < self.end_exclusive()
    }
}

fn parse_day(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| SettlementError::Validation(format!("invalid date '{value}': {e}")))
}

/// Integer percentage of `processed` over the `total` snapshot taken at
/// submission. Zero when nothing matched the range.
pub fn progress_percent(processed: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    u32::try_from(processed.saturating_mul(100) / total).unwrap_or(u32::MAX)
}

/// One asynchronous settlement-aggregation run over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Internal row identifier.
    pub id: Uuid,
    pub job_id: JobId,
    pub status: JobStatus,
    pub processed: u64,
    /// Rows matching the range when the job was created. Not refreshed.
    pub total: u64,
    pub progress: u32,
    pub range: DateRange,
    pub result_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn queued(range: DateRange, total: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_id: JobId::new(),
            status: JobStatus::Queued,
            processed: 0,
            total,
            progress: 0,
            range,
            result_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Progress reported once the job is DONE.
    pub fn final_progress(&self) -> u32 {
        if self.total == 0 { 0 } else { 100 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_progress_never_divides_by_zero() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(10, 0), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 66);
        assert_eq!(progress_percent(3, 3), 100);
    }

    #[test]
    fn test_progress_follows_stale_total() {
        // Late-arriving rows can push processed past the snapshot.
        assert_eq!(progress_percent(15, 10), 150);
        assert_eq!(progress_percent(50_000_000_000, 1), u32::MAX);
        assert_eq!(progress_percent(u64::MAX, 1), u32::MAX);
    }

    #[test]
    fn test_parse_range() {
        let range = DateRange::parse("2024-01-01", " 2024-01-31 ").unwrap();
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(range.to, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert!(range.is_valid());
    }

    #[test]
    fn test_parse_range_rejects_missing_and_malformed() {
        assert!(matches!(
            DateRange::parse("", "2024-01-31"),
            Err(SettlementError::Validation(_))
        ));
        assert!(matches!(
            DateRange::parse("2024-01-01", "31/01/2024"),
            Err(SettlementError::Validation(_))
        ));
    }

    #[test]
    fn test_inverted_range_parses_but_is_invalid() {
        let range = DateRange::parse("2024-02-01", "2024-01-01").unwrap();
        assert!(!range.is_valid());
    }

    #[test]
    fn test_range_includes_whole_last_day() {
        let range = DateRange::parse("2024-01-01", "2024-01-02").unwrap();
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 1, 2, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap()));
    }

    #[test]
    fn test_status_round_trip_and_terminality() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Done,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert_eq!(serde_json::to_string(&JobStatus::Queued).unwrap(), "\"QUEUED\"");
    }

    #[test]
    fn test_job_id_parse() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_final_progress() {
        let range = DateRange::parse("2024-01-01", "2024-01-01").unwrap();
        assert_eq!(Job::queued(range, 0).final_progress(), 0);
        assert_eq!(Job::queued(range, 7).final_progress(), 100);
    }
}
