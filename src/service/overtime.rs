use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::{error, info};
use utoipa::ToSchema;

use super::attendance::recalibrate_locked;
use crate::attendance::recalibration::{OvertimeWrite, Trigger};
use crate::error::{AppError, AppResult};
use crate::model::actor::Actor;
use crate::model::overtime::OvertimeCalculation;
use crate::notification::{self, Notification};
use crate::repo;

/// Which timesheets a generation run covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OvertimeBatch {
    #[schema(example = "2024-03-01", format = "date", value_type = String)]
    pub start: NaiveDate,
    #[schema(example = "2024-03-31", format = "date", value_type = String)]
    pub end: NaiveDate,
    /// Only users on this calculation period; all users when absent.
    #[serde(default)]
    pub period: Option<OvertimeCalculation>,
    /// Explicit sheets to recompute, regardless of the date range.
    #[serde(default)]
    pub fix_ids: Option<Vec<u64>>,
    /// Restrict the range to sheets that have no entry yet.
    #[serde(default)]
    pub fix_missing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BatchFailure {
    pub timesheet_id: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct BatchReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub locked: usize,
    pub skipped: usize,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    fn count(&mut self, write: &OvertimeWrite) {
        match write {
            OvertimeWrite::Create(_) => self.created += 1,
            OvertimeWrite::Update { .. } => self.updated += 1,
            OvertimeWrite::Delete(_) => self.deleted += 1,
            OvertimeWrite::Unchanged => self.unchanged += 1,
            OvertimeWrite::Locked(_) => self.locked += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.created + self.updated + self.deleted + self.unchanged + self.locked
    }
}

/// How a batch picks its sheets. Explicit ids win over the date range.
#[derive(Debug, PartialEq)]
enum Selection<'a> {
    Ids(&'a [u64]),
    Missing(NaiveDate, NaiveDate),
    Range(NaiveDate, NaiveDate),
}

impl OvertimeBatch {
    fn selection(&self) -> Selection<'_> {
        match &self.fix_ids {
            Some(ids) => Selection::Ids(ids),
            None if self.fix_missing => Selection::Missing(self.start, self.end),
            None => Selection::Range(self.start, self.end),
        }
    }
}

async fn select_ids(pool: &MySqlPool, batch: &OvertimeBatch) -> AppResult<Vec<u64>> {
    let mut conn = pool.acquire().await?;
    match batch.selection() {
        Selection::Ids(ids) => repo::timesheet::existing_ids(&mut conn, ids).await,
        Selection::Missing(start, end) => {
            repo::timesheet::ids_missing_overtime(&mut conn, start, end).await
        }
        Selection::Range(start, end) => repo::timesheet::ids_between(&mut conn, start, end).await,
    }
}

/// Recomputes overtime for every selected sheet, each in its own
/// transaction. A failing sheet is logged and reported; the rest go on.
/// Safe to re-run after a partial failure.
pub async fn generate_overtime(
    pool: &MySqlPool,
    batch: &OvertimeBatch,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<BatchReport> {
    if !matches!(batch.selection(), Selection::Ids(_)) && batch.start > batch.end {
        return Err(AppError::InvalidTransition(format!(
            "range start {} is after end {}",
            batch.start, batch.end
        )));
    }

    let ids = select_ids(pool, batch).await?;
    info!(
        start = %batch.start,
        end = %batch.end,
        fix_missing = batch.fix_missing,
        timesheets = ids.len(),
        "Overtime generation started"
    );

    let mut report = BatchReport::default();
    for timesheet_id in ids {
        match generate_one(pool, timesheet_id, batch.period, actor, now).await {
            Ok(Some(write)) => report.count(&write),
            Ok(None) => report.skipped += 1,
            Err(e) => {
                error!(timesheet_id, error = %e, "Overtime generation failed for timesheet");
                report.failed.push(BatchFailure {
                    timesheet_id,
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        created = report.created,
        updated = report.updated,
        deleted = report.deleted,
        unchanged = report.unchanged,
        locked = report.locked,
        skipped = report.skipped,
        failed = report.failed.len(),
        "Overtime generation finished"
    );
    Ok(report)
}

async fn generate_one(
    pool: &MySqlPool,
    timesheet_id: u64,
    period: Option<OvertimeCalculation>,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<Option<OvertimeWrite>> {
    let mut tx = pool.begin().await?;
    let Some((ts, write)) =
        recalibrate_locked(&mut tx, timesheet_id, period, actor, Trigger::Batch, now).await?
    else {
        tx.rollback().await?;
        return Ok(None);
    };
    tx.commit().await?;

    notification::dispatch(
        Notification::for_overtime(ts.id, ts.user_id, ts.timesheet_for, &write, Trigger::Batch)
            .into_iter()
            .collect(),
    );
    Ok(Some(write))
}

/// Ids of sheets touched since `since`, for the periodic sweep.
pub async fn modified_since(pool: &MySqlPool, since: NaiveDateTime) -> AppResult<Vec<u64>> {
    let mut conn = pool.acquire().await?;
    repo::timesheet::ids_modified_since(&mut conn, since).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::overtime::{ClaimStatus, OvertimeDetail, OvertimeEntry};
    use chrono::Duration;

    fn entry() -> OvertimeEntry {
        OvertimeEntry {
            id: 1,
            user_id: 7,
            timesheet_id: 1,
            overtime_setting_id: 1,
            claim_status: ClaimStatus::Unclaimed,
            detail: OvertimeDetail {
                punch_in_overtime: Duration::hours(1),
                punch_out_overtime: Duration::zero(),
                claimed_overtime: Some(Duration::hours(1)),
            },
        }
    }

    #[test]
    fn report_counts_each_outcome() {
        let mut report = BatchReport::default();
        report.count(&OvertimeWrite::Create(entry()));
        report.count(&OvertimeWrite::Delete(entry()));
        report.count(&OvertimeWrite::Unchanged);
        report.count(&OvertimeWrite::Unchanged);
        report.count(&OvertimeWrite::Locked(ClaimStatus::Approved));

        assert_eq!(report.created, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.locked, 1);
        assert_eq!(report.processed(), 5);
    }

    #[test]
    fn batch_request_defaults() {
        let batch: OvertimeBatch =
            serde_json::from_str(r#"{"start":"2024-03-01","end":"2024-03-31"}"#).unwrap();
        assert_eq!(batch.period, None);
        assert_eq!(batch.fix_ids, None);
        assert!(!batch.fix_missing);

        let daily: OvertimeBatch = serde_json::from_str(
            r#"{"start":"2024-03-01","end":"2024-03-01","period":"daily","fix_ids":[4,9]}"#,
        )
        .unwrap();
        assert_eq!(daily.period, Some(OvertimeCalculation::Daily));
        assert_eq!(daily.fix_ids, Some(vec![4, 9]));
    }

    #[test]
    fn explicit_ids_win_over_missing_only() {
        let mut batch: OvertimeBatch = serde_json::from_str(
            r#"{"start":"2024-03-01","end":"2024-03-31","fix_missing":true,"fix_ids":[3,8]}"#,
        )
        .unwrap();
        assert_eq!(batch.selection(), Selection::Ids(&[3, 8]));

        batch.fix_ids = None;
        let (start, end) = (batch.start, batch.end);
        assert_eq!(batch.selection(), Selection::Missing(start, end));

        batch.fix_missing = false;
        assert_eq!(batch.selection(), Selection::Range(start, end));
    }
}
