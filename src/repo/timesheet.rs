use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{FromRow, MySqlConnection};

use super::{from_secs, parse, placeholders, secs};
use crate::error::{AppError, AppResult};
use crate::model::actor::Actor;
use crate::model::adjustment::AttendanceAdjustment;
use crate::model::shift::WorkTiming;
use crate::model::timesheet::{TimeSheet, TimeSheetEntry};

const TIMESHEET_COLUMNS: &str = r#"
    id, user_id, timesheet_for, work_shift_id,
    work_timing_id, work_start_time, work_end_time, work_extends, working_minutes,
    work_break_start, work_break_end,
    expected_punch_in, expected_punch_out, punch_in, punch_out,
    punch_in_delta_secs, punch_out_delta_secs,
    coefficient, leave_coefficient, is_present
"#;

#[derive(FromRow)]
struct TimeSheetRow {
    id: u64,
    user_id: u64,
    timesheet_for: NaiveDate,
    work_shift_id: Option<u64>,
    work_timing_id: Option<u64>,
    work_start_time: Option<NaiveTime>,
    work_end_time: Option<NaiveTime>,
    work_extends: Option<bool>,
    working_minutes: Option<u32>,
    work_break_start: Option<NaiveTime>,
    work_break_end: Option<NaiveTime>,
    expected_punch_in: Option<NaiveDateTime>,
    expected_punch_out: Option<NaiveDateTime>,
    punch_in: Option<NaiveDateTime>,
    punch_out: Option<NaiveDateTime>,
    punch_in_delta_secs: Option<i64>,
    punch_out_delta_secs: Option<i64>,
    coefficient: String,
    leave_coefficient: String,
    is_present: bool,
}

impl TryFrom<TimeSheetRow> for TimeSheet {
    type Error = sqlx::Error;

    fn try_from(row: TimeSheetRow) -> Result<Self, Self::Error> {
        let work_time = match (row.work_timing_id, row.work_start_time, row.work_end_time) {
            (Some(id), Some(start_time), Some(end_time)) => Some(WorkTiming {
                id,
                start_time,
                end_time,
                extends: row.work_extends.unwrap_or(false),
                working_minutes: row.working_minutes.unwrap_or(0),
                break_start: row.work_break_start,
                break_end: row.work_break_end,
            }),
            _ => None,
        };
        Ok(TimeSheet {
            id: row.id,
            user_id: row.user_id,
            timesheet_for: row.timesheet_for,
            work_shift_id: row.work_shift_id,
            work_time,
            expected_punch_in: row.expected_punch_in,
            expected_punch_out: row.expected_punch_out,
            punch_in: row.punch_in,
            punch_out: row.punch_out,
            punch_in_delta: row.punch_in_delta_secs.map(from_secs),
            punch_out_delta: row.punch_out_delta_secs.map(from_secs),
            coefficient: parse("coefficient", &row.coefficient)?,
            leave_coefficient: parse("leave_coefficient", &row.leave_coefficient)?,
            is_present: row.is_present,
        })
    }
}

async fn fetch_one_where(
    conn: &mut MySqlConnection,
    clause: &str,
    binds: (u64, Option<NaiveDate>),
) -> AppResult<Option<TimeSheet>> {
    let sql = format!("SELECT {TIMESHEET_COLUMNS} FROM timesheets WHERE {clause}");
    let mut query = sqlx::query_as::<_, TimeSheetRow>(&sql).bind(binds.0);
    if let Some(date) = binds.1 {
        query = query.bind(date);
    }
    match query.fetch_optional(&mut *conn).await? {
        Some(row) => Ok(Some(row.try_into()?)),
        None => Ok(None),
    }
}

pub async fn find(conn: &mut MySqlConnection, id: u64) -> AppResult<TimeSheet> {
    fetch_one_where(conn, "id = ?", (id, None))
        .await?
        .ok_or_else(|| AppError::not_found(format!("timesheet {id}")))
}

pub async fn find_for_update(conn: &mut MySqlConnection, id: u64) -> AppResult<TimeSheet> {
    fetch_one_where(conn, "id = ? FOR UPDATE", (id, None))
        .await?
        .ok_or_else(|| AppError::not_found(format!("timesheet {id}")))
}

pub async fn find_by_date_for_update(
    conn: &mut MySqlConnection,
    user_id: u64,
    date: NaiveDate,
) -> AppResult<Option<TimeSheet>> {
    fetch_one_where(conn, "user_id = ? AND timesheet_for = ? FOR UPDATE", (user_id, Some(date))).await
}

/// Inserts a new sheet or overwrites an existing one, returning its id.
pub async fn save(conn: &mut MySqlConnection, ts: &TimeSheet) -> AppResult<u64> {
    let timing = ts.work_time.as_ref();
    let sql = if ts.id == 0 {
        r#"
        INSERT INTO timesheets
            (work_shift_id, work_timing_id, work_start_time, work_end_time, work_extends,
             working_minutes, work_break_start, work_break_end,
             expected_punch_in, expected_punch_out, punch_in, punch_out,
             punch_in_delta_secs, punch_out_delta_secs,
             coefficient, leave_coefficient, is_present, user_id, timesheet_for)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    } else {
        r#"
        UPDATE timesheets SET
            work_shift_id = ?, work_timing_id = ?, work_start_time = ?, work_end_time = ?,
            work_extends = ?, working_minutes = ?, work_break_start = ?, work_break_end = ?,
            expected_punch_in = ?, expected_punch_out = ?, punch_in = ?, punch_out = ?,
            punch_in_delta_secs = ?, punch_out_delta_secs = ?,
            coefficient = ?, leave_coefficient = ?, is_present = ?
        WHERE user_id = ? AND timesheet_for = ?
        "#
    };

    let result = sqlx::query(sql)
        .bind(ts.work_shift_id)
        .bind(timing.map(|t| t.id))
        .bind(timing.map(|t| t.start_time))
        .bind(timing.map(|t| t.end_time))
        .bind(timing.map(|t| t.extends))
        .bind(timing.map(|t| t.working_minutes))
        .bind(timing.and_then(|t| t.break_start))
        .bind(timing.and_then(|t| t.break_end))
        .bind(ts.expected_punch_in)
        .bind(ts.expected_punch_out)
        .bind(ts.punch_in)
        .bind(ts.punch_out)
        .bind(ts.punch_in_delta.map(secs))
        .bind(ts.punch_out_delta.map(secs))
        .bind(ts.coefficient.as_ref())
        .bind(ts.leave_coefficient.as_ref())
        .bind(ts.is_present)
        .bind(ts.user_id)
        .bind(ts.timesheet_for)
        .execute(&mut *conn)
        .await?;

    Ok(if ts.id == 0 {
        result.last_insert_id()
    } else {
        ts.id
    })
}

pub async fn ids_between(
    conn: &mut MySqlConnection,
    from: NaiveDate,
    to: NaiveDate,
) -> AppResult<Vec<u64>> {
    let ids = sqlx::query_scalar(
        "SELECT id FROM timesheets WHERE timesheet_for BETWEEN ? AND ? ORDER BY timesheet_for, id",
    )
    .bind(from)
    .bind(to)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Sheets in range that have no overtime entry yet.
pub async fn ids_missing_overtime(
    conn: &mut MySqlConnection,
    from: NaiveDate,
    to: NaiveDate,
) -> AppResult<Vec<u64>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT t.id FROM timesheets t
        LEFT JOIN overtime_entries o ON o.timesheet_id = t.id
        WHERE t.timesheet_for BETWEEN ? AND ? AND o.id IS NULL
        ORDER BY t.timesheet_for, t.id
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Restricts `ids` to those that exist, keeping the given order.
pub async fn existing_ids(conn: &mut MySqlConnection, ids: &[u64]) -> AppResult<Vec<u64>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id FROM timesheets WHERE id IN ({})",
        placeholders(ids.len())
    );
    let mut query = sqlx::query_scalar::<_, u64>(&sql);
    for id in ids {
        query = query.bind(*id);
    }
    let found = query.fetch_all(&mut *conn).await?;
    Ok(ids.iter().copied().filter(|id| found.contains(id)).collect())
}

pub async fn ids_modified_since(
    conn: &mut MySqlConnection,
    since: NaiveDateTime,
) -> AppResult<Vec<u64>> {
    let ids = sqlx::query_scalar("SELECT id FROM timesheets WHERE updated_at >= ? ORDER BY id")
        .bind(since)
        .fetch_all(&mut *conn)
        .await?;
    Ok(ids)
}

/// Days the user was present on a workday after `since`.
pub async fn worked_days_since(
    conn: &mut MySqlConnection,
    user_id: u64,
    since: NaiveDate,
) -> AppResult<u32> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM timesheets
        WHERE user_id = ? AND timesheet_for > ? AND is_present = TRUE AND coefficient = 'workday'
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_one(&mut *conn)
    .await?;
    Ok(u32::try_from(count).unwrap_or(u32::MAX))
}

#[derive(FromRow)]
struct EntryRow {
    id: u64,
    timesheet_id: u64,
    timestamp: NaiveDateTime,
    entry_method: String,
    is_deleted: bool,
}

pub async fn entries_for(
    conn: &mut MySqlConnection,
    timesheet_id: u64,
) -> AppResult<Vec<TimeSheetEntry>> {
    let rows = sqlx::query_as::<_, EntryRow>(
        r#"
        SELECT id, timesheet_id, timestamp, entry_method, is_deleted
        FROM timesheet_entries
        WHERE timesheet_id = ?
        ORDER BY timestamp
        "#,
    )
    .bind(timesheet_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|r| -> AppResult<TimeSheetEntry> {
            Ok(TimeSheetEntry {
                id: r.id,
                timesheet_id: r.timesheet_id,
                timestamp: r.timestamp,
                entry_method: parse("entry_method", &r.entry_method)?,
                is_deleted: r.is_deleted,
            })
        })
        .collect()
}

pub async fn insert_entry(conn: &mut MySqlConnection, entry: &TimeSheetEntry) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO timesheet_entries (timesheet_id, timestamp, entry_method, is_deleted)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(entry.timesheet_id)
    .bind(entry.timestamp)
    .bind(entry.entry_method.as_ref())
    .bind(entry.is_deleted)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id())
}

#[derive(FromRow)]
struct AdjustmentRow {
    id: u64,
    timesheet_id: u64,
    timestamp: NaiveDateTime,
    category: String,
    status: String,
    description: String,
    acted_by: Option<u64>,
    acted_at: Option<NaiveDateTime>,
}

impl TryFrom<AdjustmentRow> for AttendanceAdjustment {
    type Error = sqlx::Error;

    fn try_from(r: AdjustmentRow) -> Result<Self, Self::Error> {
        Ok(AttendanceAdjustment {
            id: r.id,
            timesheet_id: r.timesheet_id,
            timestamp: r.timestamp,
            category: parse("category", &r.category)?,
            status: parse("status", &r.status)?,
            description: r.description,
            // acted_at without acted_by means the system acted
            acted_by: r.acted_at.map(|_| Actor::from_user_id(r.acted_by)),
            acted_at: r.acted_at,
        })
    }
}

const ADJUSTMENT_COLUMNS: &str =
    "id, timesheet_id, timestamp, category, status, description, acted_by, acted_at";

pub async fn adjustments_for(
    conn: &mut MySqlConnection,
    timesheet_id: u64,
) -> AppResult<Vec<AttendanceAdjustment>> {
    let sql = format!(
        "SELECT {ADJUSTMENT_COLUMNS} FROM attendance_adjustments WHERE timesheet_id = ? ORDER BY id"
    );
    let rows = sqlx::query_as::<_, AdjustmentRow>(&sql)
        .bind(timesheet_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter()
        .map(|r| AttendanceAdjustment::try_from(r).map_err(AppError::from))
        .collect()
}

pub async fn adjustment_for_update(
    conn: &mut MySqlConnection,
    id: u64,
) -> AppResult<AttendanceAdjustment> {
    let sql = format!("SELECT {ADJUSTMENT_COLUMNS} FROM attendance_adjustments WHERE id = ? FOR UPDATE");
    let row = sqlx::query_as::<_, AdjustmentRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("attendance adjustment {id}")))?;
    Ok(row.try_into()?)
}

pub async fn insert_adjustment(
    conn: &mut MySqlConnection,
    adjustment: &AttendanceAdjustment,
    requested_by: u64,
) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO attendance_adjustments
            (timesheet_id, timestamp, category, status, description, requested_by)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(adjustment.timesheet_id)
    .bind(adjustment.timestamp)
    .bind(adjustment.category.as_ref())
    .bind(adjustment.status.as_ref())
    .bind(&adjustment.description)
    .bind(requested_by)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id())
}

pub async fn update_adjustment_status(
    conn: &mut MySqlConnection,
    adjustment: &AttendanceAdjustment,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE attendance_adjustments SET status = ?, acted_by = ?, acted_at = ? WHERE id = ?",
    )
    .bind(adjustment.status.as_ref())
    .bind(adjustment.acted_by.and_then(|a| a.user_id()))
    .bind(adjustment.acted_at)
    .bind(adjustment.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Off-day and holiday sheets of the user with both punches in `[from, to]`.
pub async fn worked_off_days(
    conn: &mut MySqlConnection,
    user_id: u64,
    from: NaiveDate,
    to: NaiveDate,
) -> AppResult<Vec<TimeSheet>> {
    let sql = format!(
        r#"
        SELECT {TIMESHEET_COLUMNS} FROM timesheets
        WHERE user_id = ? AND timesheet_for BETWEEN ? AND ?
          AND coefficient IN ('offday', 'holiday')
          AND punch_in IS NOT NULL AND punch_out IS NOT NULL
        ORDER BY timesheet_for
        "#
    );
    let rows = sqlx::query_as::<_, TimeSheetRow>(&sql)
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter()
        .map(|r| TimeSheet::try_from(r).map_err(AppError::from))
        .collect()
}
