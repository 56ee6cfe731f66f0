//! Attendance ledger: append-only attendance events with dedup policies.
//!
//! The existence check and the insert of a mark run inside one
//! `IMMEDIATE` transaction, so two sessions marking the same identity at
//! the same moment cannot both insert.

use crate::db::{Database, StoreError};
use chrono::{Local, NaiveDate, NaiveTime};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Cool-down between two rate-limited marks of the same identity.
pub const RATE_LIMIT_WINDOW_SECS: i64 = 300;

/// Dedup policy applied by [`Ledger::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkMode {
    /// Re-entry debounce: refuse a mark within 300 s of the identity's
    /// latest mark that day. Several marks per day are possible.
    RateLimited,
    /// At most one mark per identity per date.
    OncePerDay,
}

#[derive(Error, Debug)]
#[error("unknown mark mode {0:?} (expected \"rate-limited\" or \"once-per-day\")")]
pub struct ParseMarkModeError(String);

impl FromStr for MarkMode {
    type Err = ParseMarkModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rate-limited" => Ok(MarkMode::RateLimited),
            "once-per-day" => Ok(MarkMode::OncePerDay),
            other => Err(ParseMarkModeError(other.to_string())),
        }
    }
}

impl std::fmt::Display for MarkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkMode::RateLimited => f.write_str("rate-limited"),
            MarkMode::OncePerDay => f.write_str("once-per-day"),
        }
    }
}

/// Result of a mark attempt. Storage failures are folded into `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    AlreadyMarked,
    Failed,
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceEvent {
    pub identity: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// Aggregate counts over the whole ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    pub total_records: usize,
    pub unique_identities: usize,
    /// `(date, records)` with the most recent date first.
    pub per_date: Vec<(NaiveDate, usize)>,
}

pub struct Ledger {
    db: Database,
}

impl Ledger {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Mark `identity` present on `date` at the current local time.
    pub fn mark(&self, identity: &str, date: NaiveDate, mode: MarkMode) -> MarkOutcome {
        self.mark_at(identity, date, Local::now().time(), mode)
    }

    /// Mark `identity` present on `date` at wall-clock time `now`.
    pub fn mark_at(
        &self,
        identity: &str,
        date: NaiveDate,
        now: NaiveTime,
        mode: MarkMode,
    ) -> MarkOutcome {
        match self.try_mark(identity, date, now, mode) {
            Ok(true) => {
                tracing::info!(identity, %date, time = %now.format(TIME_FORMAT), %mode, "attendance marked");
                MarkOutcome::Marked
            }
            Ok(false) => {
                tracing::debug!(identity, %date, %mode, "attendance already marked");
                MarkOutcome::AlreadyMarked
            }
            Err(e) => {
                tracing::warn!(identity, %date, error = %e, "failed to mark attendance");
                MarkOutcome::Failed
            }
        }
    }

    fn try_mark(
        &self,
        identity: &str,
        date: NaiveDate,
        now: NaiveTime,
        mode: MarkMode,
    ) -> Result<bool, StoreError> {
        if identity.trim().is_empty() {
            return Err(StoreError::InvalidValue("identity must not be empty".into()));
        }
        let date = date.format(DATE_FORMAT).to_string();
        let now = truncate_to_second(now);

        let mut conn = self.db.attendance_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let blocked = match mode {
            MarkMode::OncePerDay => tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM attendance WHERE name = ?1 AND date = ?2)",
                params![identity, date],
                |row| row.get::<_, bool>(0),
            )?,
            MarkMode::RateLimited => {
                let last: Option<String> = tx
                    .query_row(
                        "SELECT time FROM attendance WHERE name = ?1 AND date = ?2
                         ORDER BY time DESC LIMIT 1",
                        params![identity, date],
                        |row| row.get(0),
                    )
                    .optional()?;
                match last {
                    Some(last) => within_rate_limit(parse_time(&last)?, now),
                    None => false,
                }
            }
        };

        if blocked {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO attendance (name, date, time) VALUES (?1, ?2, ?3)",
            params![identity, date, now.format(TIME_FORMAT).to_string()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Events for `date` (or all events), most recent first.
    pub fn list(&self, date: Option<NaiveDate>) -> Result<Vec<AttendanceEvent>, StoreError> {
        let conn = self.db.attendance_conn()?;
        match date {
            Some(date) => {
                let mut stmt = conn.prepare(
                    "SELECT name, date, time FROM attendance WHERE date = ?1
                     ORDER BY date DESC, time DESC",
                )?;
                let rows = stmt.query_map(params![date.format(DATE_FORMAT).to_string()], raw_event)?;
                collect_events(rows)
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT name, date, time FROM attendance ORDER BY date DESC, time DESC",
                )?;
                let rows = stmt.query_map([], raw_event)?;
                collect_events(rows)
            }
        }
    }

    /// Every event for one identity, most recent first.
    pub fn list_by_identity(&self, identity: &str) -> Result<Vec<AttendanceEvent>, StoreError> {
        let conn = self.db.attendance_conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, date, time FROM attendance WHERE name = ?1
             ORDER BY date DESC, time DESC",
        )?;
        let rows = stmt.query_map(params![identity], raw_event)?;
        collect_events(rows)
    }

    /// Delete the event matching all three fields. Returns `false` if none did.
    pub fn delete(
        &self,
        identity: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, StoreError> {
        let conn = self.db.attendance_conn()?;
        let removed = conn.execute(
            "DELETE FROM attendance WHERE name = ?1 AND date = ?2 AND time = ?3",
            params![
                identity,
                date.format(DATE_FORMAT).to_string(),
                time.format(TIME_FORMAT).to_string()
            ],
        )?;
        if removed > 0 {
            tracing::info!(identity, %date, %time, removed, "attendance record deleted");
        }
        Ok(removed > 0)
    }

    pub fn summarize(&self) -> Result<AttendanceSummary, StoreError> {
        let conn = self.db.attendance_conn()?;
        let (total, unique): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT name) FROM attendance",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt =
            conn.prepare("SELECT date, COUNT(*) FROM attendance GROUP BY date ORDER BY date DESC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut per_date = Vec::new();
        for row in rows {
            let (date, count) = row?;
            per_date.push((parse_date(&date)?, count as usize));
        }

        Ok(AttendanceSummary {
            total_records: total as usize,
            unique_identities: unique as usize,
            per_date,
        })
    }
}

fn within_rate_limit(last: NaiveTime, now: NaiveTime) -> bool {
    now.signed_duration_since(last).num_seconds().abs() < RATE_LIMIT_WINDOW_SECS
}

fn truncate_to_second(time: NaiveTime) -> NaiveTime {
    use chrono::Timelike;
    time.with_nanosecond(0).unwrap_or(time)
}

fn parse_date(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| StoreError::InvalidValue(format!("date {raw:?}: {e}")))
}

fn parse_time(raw: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(raw, TIME_FORMAT)
        .map_err(|e| StoreError::InvalidValue(format!("time {raw:?}: {e}")))
}

fn raw_event(row: &Row<'_>) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn collect_events(
    rows: impl Iterator<Item = rusqlite::Result<(String, String, String)>>,
) -> Result<Vec<AttendanceEvent>, StoreError> {
    let mut events = Vec::new();
    for row in rows {
        let (identity, date, time) = row?;
        events.push(AttendanceEvent {
            identity,
            date: parse_date(&date)?,
            time: parse_time(&time)?,
        });
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ledger() -> (tempfile::TempDir, Ledger) {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::in_dir(tmp.path()).unwrap();
        (tmp, db.ledger())
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_once_per_day_marks_exactly_once() {
        let (_tmp, ledger) = ledger();
        assert_eq!(
            ledger.mark_at("alice", day(1), at(9, 0, 0), MarkMode::OncePerDay),
            MarkOutcome::Marked
        );
        for hour in [9, 12, 18, 23] {
            assert_eq!(
                ledger.mark_at("alice", day(1), at(hour, 30, 0), MarkMode::OncePerDay),
                MarkOutcome::AlreadyMarked
            );
        }
        assert_eq!(ledger.list(Some(day(1))).unwrap().len(), 1);
    }

    #[test]
    fn test_once_per_day_is_per_date_and_identity() {
        let (_tmp, ledger) = ledger();
        assert_eq!(ledger.mark_at("alice", day(1), at(9, 0, 0), MarkMode::OncePerDay), MarkOutcome::Marked);
        assert_eq!(ledger.mark_at("alice", day(2), at(9, 0, 0), MarkMode::OncePerDay), MarkOutcome::Marked);
        assert_eq!(ledger.mark_at("bob", day(1), at(9, 0, 0), MarkMode::OncePerDay), MarkOutcome::Marked);
    }

    #[rstest]
    #[case::immediately(at(10, 0, 0), MarkOutcome::AlreadyMarked)]
    #[case::one_minute(at(10, 1, 0), MarkOutcome::AlreadyMarked)]
    #[case::just_inside(at(10, 4, 59), MarkOutcome::AlreadyMarked)]
    #[case::exactly_window(at(10, 5, 0), MarkOutcome::Marked)]
    #[case::well_after(at(14, 0, 0), MarkOutcome::Marked)]
    fn test_rate_limited_window(#[case] second: NaiveTime, #[case] expected: MarkOutcome) {
        let (_tmp, ledger) = ledger();
        assert_eq!(
            ledger.mark_at("alice", day(1), at(10, 0, 0), MarkMode::RateLimited),
            MarkOutcome::Marked
        );
        assert_eq!(
            ledger.mark_at("alice", day(1), second, MarkMode::RateLimited),
            expected
        );
    }

    #[test]
    fn test_rate_limited_allows_several_marks_per_day() {
        let (_tmp, ledger) = ledger();
        for hour in [8, 12, 17] {
            assert_eq!(
                ledger.mark_at("alice", day(1), at(hour, 0, 0), MarkMode::RateLimited),
                MarkOutcome::Marked
            );
        }
        assert_eq!(ledger.list_by_identity("alice").unwrap().len(), 3);
    }

    #[test]
    fn test_rate_limited_compares_latest_mark() {
        let (_tmp, ledger) = ledger();
        ledger.mark_at("alice", day(1), at(8, 0, 0), MarkMode::RateLimited);
        ledger.mark_at("alice", day(1), at(9, 0, 0), MarkMode::RateLimited);
        assert_eq!(
            ledger.mark_at("alice", day(1), at(9, 2, 0), MarkMode::RateLimited),
            MarkOutcome::AlreadyMarked
        );
    }

    #[test]
    fn test_rate_limited_ignores_other_dates() {
        let (_tmp, ledger) = ledger();
        ledger.mark_at("alice", day(1), at(10, 0, 0), MarkMode::RateLimited);
        assert_eq!(
            ledger.mark_at("alice", day(2), at(10, 0, 30), MarkMode::RateLimited),
            MarkOutcome::Marked
        );
    }

    #[rstest]
    #[case::empty("", MarkMode::OncePerDay)]
    #[case::spaces("   ", MarkMode::OncePerDay)]
    #[case::whitespace("\t\n", MarkMode::RateLimited)]
    fn test_blank_identity_is_rejected(#[case] identity: &str, #[case] mode: MarkMode) {
        let (_tmp, ledger) = ledger();
        assert_eq!(
            ledger.mark_at(identity, day(1), at(9, 0, 0), mode),
            MarkOutcome::Failed
        );
        assert!(ledger.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_mark_on_unavailable_store_fails() {
        let (tmp, ledger) = ledger();
        let attendance = tmp.path().join("attendance.db");
        std::fs::remove_file(&attendance).unwrap();
        std::fs::create_dir(&attendance).unwrap();

        assert_eq!(
            ledger.mark_at("alice", day(1), at(9, 0, 0), MarkMode::OncePerDay),
            MarkOutcome::Failed
        );
    }

    #[test]
    fn test_list_most_recent_first() {
        let (_tmp, ledger) = ledger();
        ledger.mark_at("alice", day(1), at(9, 0, 0), MarkMode::OncePerDay);
        ledger.mark_at("bob", day(2), at(8, 0, 0), MarkMode::OncePerDay);
        ledger.mark_at("carol", day(2), at(11, 0, 0), MarkMode::OncePerDay);

        let names: Vec<_> = ledger.list(None).unwrap().into_iter().map(|e| e.identity).collect();
        assert_eq!(names, vec!["carol", "bob", "alice"]);

        let on_day_two: Vec<_> = ledger
            .list(Some(day(2)))
            .unwrap()
            .into_iter()
            .map(|e| e.identity)
            .collect();
        assert_eq!(on_day_two, vec!["carol", "bob"]);
    }

    #[test]
    fn test_list_by_identity() {
        let (_tmp, ledger) = ledger();
        ledger.mark_at("alice", day(1), at(9, 0, 0), MarkMode::OncePerDay);
        ledger.mark_at("alice", day(3), at(9, 0, 0), MarkMode::OncePerDay);
        ledger.mark_at("bob", day(2), at(9, 0, 0), MarkMode::OncePerDay);

        let events = ledger.list_by_identity("alice").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].date, day(3));
        assert_eq!(events[1].date, day(1));
    }

    #[test]
    fn test_delete() {
        let (_tmp, ledger) = ledger();
        ledger.mark_at("alice", day(1), at(9, 15, 0), MarkMode::OncePerDay);

        assert!(!ledger.delete("alice", day(1), at(9, 16, 0)).unwrap());
        assert!(ledger.delete("alice", day(1), at(9, 15, 0)).unwrap());
        assert!(ledger.list(None).unwrap().is_empty());

        // A deleted mark no longer blocks the day.
        assert_eq!(
            ledger.mark_at("alice", day(1), at(10, 0, 0), MarkMode::OncePerDay),
            MarkOutcome::Marked
        );
    }

    #[test]
    fn test_summarize() {
        let (_tmp, ledger) = ledger();
        ledger.mark_at("alice", day(1), at(9, 0, 0), MarkMode::OncePerDay);
        ledger.mark_at("bob", day(1), at(9, 5, 0), MarkMode::OncePerDay);
        ledger.mark_at("alice", day(2), at(9, 0, 0), MarkMode::OncePerDay);

        let summary = ledger.summarize().unwrap();
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.unique_identities, 2);
        assert_eq!(summary.per_date, vec![(day(2), 1), (day(1), 2)]);
    }

    #[test]
    fn test_summarize_empty() {
        let (_tmp, ledger) = ledger();
        let summary = ledger.summarize().unwrap();
        assert_eq!(summary.total_records, 0);
        assert_eq!(summary.unique_identities, 0);
        assert!(summary.per_date.is_empty());
    }

    #[test]
    fn test_concurrent_once_per_day_marks_insert_once() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::in_dir(tmp.path()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = db.ledger();
                std::thread::spawn(move || {
                    ledger.mark_at("alice", day(1), at(9, 0, 0), MarkMode::OncePerDay)
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| **o == MarkOutcome::Marked).count(), 1);
        assert_eq!(db.ledger().list(Some(day(1))).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_mode_parse_round_trip() {
        for mode in [MarkMode::RateLimited, MarkMode::OncePerDay] {
            assert_eq!(mode.to_string().parse::<MarkMode>().unwrap(), mode);
        }
        assert!("weekly".parse::<MarkMode>().is_err());
    }
}
