use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{MySqlConnection, MySqlPool};
use tracing::{debug, info};

use crate::attendance::materializer;
use crate::attendance::recalibration::{self, OvertimeWrite, PlanContext, Trigger};
use crate::attendance::resolver;
use crate::error::{AppError, AppResult};
use crate::model::actor::Actor;
use crate::model::adjustment::{AdjustmentCategory, AdjustmentStatus, AttendanceAdjustment};
use crate::model::overtime::{OvertimeCalculation, OvertimeDetailHistory, OvertimeEntry};
use crate::model::shift::{IndividualUserShift, UserContext, WorkShift};
use crate::model::timesheet::{EntryMethod, TimeSheet, TimeSheetEntry};
use crate::notification::{self, Notification};
use crate::repo;

/// Shift assignments and templates of one user.
pub(crate) struct Calendar {
    pub user: UserContext,
    assignments: Vec<IndividualUserShift>,
    shifts: Vec<WorkShift>,
}

impl Calendar {
    pub(crate) async fn load(conn: &mut MySqlConnection, user_id: u64) -> AppResult<Self> {
        let user = repo::shift::user_context(conn, user_id).await?;
        let assignments = repo::shift::assignments_for(conn, user_id).await?;
        let shifts = repo::shift::shifts_for(conn, &assignments).await?;
        Ok(Calendar {
            user,
            assignments,
            shifts,
        })
    }

    /// Creates or re-derives the sheet for `date` and saves it. The leave
    /// coefficient follows the approved requests covering the date.
    ///
    /// A date no assignment covers yields `None` unless `unscheduled` is set
    /// or a sheet already exists; such sheets are off-days without a shift.
    pub(crate) async fn ensure_sheet(
        &self,
        conn: &mut MySqlConnection,
        date: NaiveDate,
        unscheduled: bool,
    ) -> AppResult<Option<TimeSheet>> {
        let user_id = self.user.user_id;
        let existing = repo::timesheet::find_by_date_for_update(conn, user_id, date).await?;
        let resolved = match resolver::resolve(&self.assignments, &self.shifts, user_id, date) {
            Ok(day) => Some(day),
            Err(AppError::NoApplicableShift { .. }) if unscheduled || existing.is_some() => None,
            Err(AppError::NoApplicableShift { .. }) => {
                debug!(user_id, %date, "No shift assignment covers date, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let holidays =
            repo::shift::holidays_between(conn, self.user.organization_id, date, date).await?;
        let covering = repo::leave::approved_requests_covering(conn, user_id, date).await?;
        let mut ts = materializer::materialize(existing, &self.user, date, resolved.as_ref(), &holidays);
        materializer::apply_leave_coefficient(&mut ts, materializer::leave_on(&covering, date));
        ts.id = repo::timesheet::save(conn, &ts).await?;
        Ok(Some(ts))
    }
}

/// Refreshes the sheet from the given inputs, recomputes its overtime and
/// writes both. The caller owns the transaction and has locked the sheet.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn recalibrate_with(
    conn: &mut MySqlConnection,
    user: &UserContext,
    ts: &mut TimeSheet,
    entries: &[TimeSheetEntry],
    adjustments: &[AttendanceAdjustment],
    actor: Actor,
    trigger: Trigger,
    now: NaiveDateTime,
) -> AppResult<OvertimeWrite> {
    let setting = repo::overtime::setting_for_user(conn, user.user_id, user.organization_id).await?;
    let compensatory = repo::overtime::compensatory_rules_for_user(conn, user.user_id).await?;
    let existing = repo::overtime::entry_for_timesheet_for_update(conn, ts.id).await?;

    let ctx = PlanContext {
        setting: setting.as_ref(),
        actor,
        trigger,
        now,
    };
    let write = recalibration::refresh_and_plan(
        ts,
        entries,
        adjustments,
        &compensatory,
        existing.as_ref(),
        &ctx,
    )?;

    repo::timesheet::save(conn, ts).await?;
    repo::overtime::apply_write(conn, &write).await?;

    if let OvertimeWrite::Locked(status) = &write {
        info!(
            timesheet_id = ts.id,
            claim_status = %status,
            "Overtime left untouched, claim already in progress"
        );
    }
    Ok(write)
}

pub(crate) async fn recalibrate(
    conn: &mut MySqlConnection,
    user: &UserContext,
    ts: &mut TimeSheet,
    actor: Actor,
    trigger: Trigger,
    now: NaiveDateTime,
) -> AppResult<OvertimeWrite> {
    let entries = repo::timesheet::entries_for(conn, ts.id).await?;
    let adjustments = repo::timesheet::adjustments_for(conn, ts.id).await?;
    recalibrate_with(conn, user, ts, &entries, &adjustments, actor, trigger, now).await
}

/// Locks one sheet and recalibrates it. With `period` set, sheets whose
/// user is on a different calculation period are skipped (`Ok(None)`).
pub(crate) async fn recalibrate_locked(
    conn: &mut MySqlConnection,
    timesheet_id: u64,
    period: Option<OvertimeCalculation>,
    actor: Actor,
    trigger: Trigger,
    now: NaiveDateTime,
) -> AppResult<Option<(TimeSheet, OvertimeWrite)>> {
    let mut ts = repo::timesheet::find_for_update(conn, timesheet_id).await?;
    let user = repo::shift::user_context(conn, ts.user_id).await?;

    if let Some(period) = period {
        let setting =
            repo::overtime::setting_for_user(conn, user.user_id, user.organization_id).await?;
        if setting.is_some_and(|s| s.overtime_calculation != period) {
            return Ok(None);
        }
    }

    let write = recalibrate(conn, &user, &mut ts, actor, trigger, now).await?;
    Ok(Some((ts, write)))
}

pub struct ClockOutcome {
    pub timesheet: TimeSheet,
    pub entry: TimeSheetEntry,
    pub overtime: OvertimeWrite,
}

/// Records a punch. The sheet's date is the punch's calendar date.
pub async fn clock(
    pool: &MySqlPool,
    user_id: u64,
    timestamp: NaiveDateTime,
    entry_method: EntryMethod,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<ClockOutcome> {
    let mut tx = pool.begin().await?;

    let calendar = Calendar::load(&mut tx, user_id).await?;
    let mut ts = calendar
        .ensure_sheet(&mut tx, timestamp.date(), true)
        .await?
        .ok_or_else(|| AppError::not_found(format!("timesheet for user {user_id}")))?;

    let mut entries = repo::timesheet::entries_for(&mut tx, ts.id).await?;
    let adjustments = repo::timesheet::adjustments_for(&mut tx, ts.id).await?;
    let mut entry = materializer::clock(&mut ts, &mut entries, &adjustments, timestamp, entry_method);
    entry.id = repo::timesheet::insert_entry(&mut tx, &entry).await?;
    if let Some(last) = entries.last_mut() {
        last.id = entry.id;
    }

    let overtime = recalibrate_with(
        &mut tx,
        &calendar.user,
        &mut ts,
        &entries,
        &adjustments,
        actor,
        Trigger::Punch,
        now,
    )
    .await?;

    tx.commit().await?;

    info!(user_id, timesheet_id = ts.id, %timestamp, method = %entry_method, "Punch recorded");
    notification::dispatch(
        Notification::for_overtime(ts.id, user_id, ts.timesheet_for, &overtime, Trigger::Punch)
            .into_iter()
            .collect(),
    );

    Ok(ClockOutcome {
        timesheet: ts,
        entry,
        overtime,
    })
}

pub async fn request_adjustment(
    pool: &MySqlPool,
    timesheet_id: u64,
    timestamp: NaiveDateTime,
    category: AdjustmentCategory,
    description: String,
    requested_by: u64,
) -> AppResult<AttendanceAdjustment> {
    let mut conn = pool.acquire().await?;
    let ts = repo::timesheet::find(&mut conn, timesheet_id).await?;
    if timestamp.date() != ts.timesheet_for {
        return Err(AppError::InvalidTransition(format!(
            "adjustment at {timestamp} does not belong to timesheet of {}",
            ts.timesheet_for
        )));
    }

    let mut adjustment = AttendanceAdjustment {
        id: 0,
        timesheet_id,
        timestamp,
        category,
        status: AdjustmentStatus::Pending,
        description,
        acted_by: None,
        acted_at: None,
    };
    adjustment.id = repo::timesheet::insert_adjustment(&mut conn, &adjustment, requested_by).await?;
    Ok(adjustment)
}

/// Approves an adjustment and recalibrates its sheet in the same transaction.
pub async fn approve_adjustment(
    pool: &MySqlPool,
    adjustment_id: u64,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<(AttendanceAdjustment, OvertimeWrite)> {
    let mut tx = pool.begin().await?;

    let mut adjustment = repo::timesheet::adjustment_for_update(&mut tx, adjustment_id).await?;
    adjustment.approve(actor, now)?;
    repo::timesheet::update_adjustment_status(&mut tx, &adjustment).await?;

    let (ts, write) = recalibrate_locked(
        &mut tx,
        adjustment.timesheet_id,
        None,
        actor,
        Trigger::AdjustmentApproved,
        now,
    )
    .await?
    .ok_or_else(|| AppError::not_found(format!("timesheet {}", adjustment.timesheet_id)))?;

    tx.commit().await?;

    info!(adjustment_id, timesheet_id = ts.id, %actor, "Attendance adjustment approved");
    notification::dispatch(
        Notification::for_overtime(
            ts.id,
            ts.user_id,
            ts.timesheet_for,
            &write,
            Trigger::AdjustmentApproved,
        )
        .into_iter()
        .collect(),
    );
    Ok((adjustment, write))
}

pub async fn decline_adjustment(
    pool: &MySqlPool,
    adjustment_id: u64,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<AttendanceAdjustment> {
    let mut tx = pool.begin().await?;
    let mut adjustment = repo::timesheet::adjustment_for_update(&mut tx, adjustment_id).await?;
    adjustment.decline(actor, now)?;
    repo::timesheet::update_adjustment_status(&mut tx, &adjustment).await?;
    tx.commit().await?;

    info!(adjustment_id, %actor, "Attendance adjustment declined");
    Ok(adjustment)
}

/// Materializes every date of `[from, to]` for the user and recalibrates
/// each sheet. Re-running is a no-op for dates whose inputs did not change.
pub async fn materialize_range(
    pool: &MySqlPool,
    user_id: u64,
    from: NaiveDate,
    to: NaiveDate,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<Vec<TimeSheet>> {
    if from > to {
        return Err(AppError::InvalidTransition(format!(
            "range start {from} is after end {to}"
        )));
    }

    let mut tx = pool.begin().await?;
    let calendar = Calendar::load(&mut tx, user_id).await?;

    let mut sheets = Vec::new();
    let mut notifications = Vec::new();
    for date in from.iter_days().take_while(|d| *d <= to) {
        let Some(mut ts) = calendar.ensure_sheet(&mut tx, date, false).await? else {
            continue;
        };
        let write = recalibrate(&mut tx, &calendar.user, &mut ts, actor, Trigger::Batch, now).await?;
        notifications.extend(Notification::for_overtime(ts.id, user_id, date, &write, Trigger::Batch));
        sheets.push(ts);
    }

    tx.commit().await?;

    info!(user_id, %from, %to, materialized = sheets.len(), "Timesheets materialized");
    notification::dispatch(notifications);
    Ok(sheets)
}

/// Recomputes one sheet's overtime in its own transaction.
pub async fn recalibrate_timesheet(
    pool: &MySqlPool,
    timesheet_id: u64,
    actor: Actor,
    trigger: Trigger,
    now: NaiveDateTime,
) -> AppResult<OvertimeWrite> {
    let mut tx = pool.begin().await?;
    let (ts, write) = recalibrate_locked(&mut tx, timesheet_id, None, actor, trigger, now)
        .await?
        .ok_or_else(|| AppError::not_found(format!("timesheet {timesheet_id}")))?;
    tx.commit().await?;

    if write.is_write() {
        notification::dispatch(
            Notification::for_overtime(ts.id, ts.user_id, ts.timesheet_for, &write, trigger)
                .into_iter()
                .collect(),
        );
    }
    Ok(write)
}

pub struct TimesheetView {
    pub timesheet: TimeSheet,
    pub entries: Vec<TimeSheetEntry>,
    pub adjustments: Vec<AttendanceAdjustment>,
    pub overtime: Option<OvertimeEntry>,
    pub overtime_history: Vec<OvertimeDetailHistory>,
}

pub async fn timesheet(pool: &MySqlPool, timesheet_id: u64) -> AppResult<TimesheetView> {
    let mut conn = pool.acquire().await?;
    let timesheet = repo::timesheet::find(&mut conn, timesheet_id).await?;
    let entries = repo::timesheet::entries_for(&mut conn, timesheet_id).await?;
    let adjustments = repo::timesheet::adjustments_for(&mut conn, timesheet_id).await?;
    let overtime = repo::overtime::entry_for_timesheet(&mut conn, timesheet_id).await?;
    let overtime_history = match &overtime {
        Some(entry) => repo::overtime::history_for_entry(&mut conn, entry.id).await?,
        None => Vec::new(),
    };

    Ok(TimesheetView {
        timesheet,
        entries,
        adjustments,
        overtime,
        overtime_history,
    })
}
