use chrono::NaiveDate;
use sqlx::{FromRow, MySqlConnection};

use crate::error::{AppError, AppResult};
use crate::model::shift::{
    Holiday, IndividualUserShift, UserContext, WorkDay, WorkShift, WorkTiming, weekday_from_number,
};

#[derive(FromRow)]
struct WorkDayRow {
    id: u64,
    day: u8,
    applicable_from: NaiveDate,
    applicable_to: Option<NaiveDate>,
}

pub async fn user_context(conn: &mut MySqlConnection, user_id: u64) -> AppResult<UserContext> {
    sqlx::query_as::<_, UserContext>(
        r#"
        SELECT user_id, organization_id, branch_id, division_id
        FROM employees
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found(format!("employee {user_id}")))
}

/// Every shift assignment the user ever had.
pub async fn assignments_for(
    conn: &mut MySqlConnection,
    user_id: u64,
) -> AppResult<Vec<IndividualUserShift>> {
    let rows = sqlx::query_as::<_, IndividualUserShift>(
        r#"
        SELECT id, user_id, shift_id, applicable_from, applicable_to
        FROM individual_user_shifts
        WHERE user_id = ?
        ORDER BY applicable_from
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn load_shift(conn: &mut MySqlConnection, shift_id: u64) -> AppResult<WorkShift> {
    let name: Option<String> = sqlx::query_scalar("SELECT name FROM work_shifts WHERE id = ?")
        .bind(shift_id)
        .fetch_optional(&mut *conn)
        .await?;
    let name = name.ok_or_else(|| AppError::not_found(format!("work shift {shift_id}")))?;

    let day_rows = sqlx::query_as::<_, WorkDayRow>(
        r#"
        SELECT id, day, applicable_from, applicable_to
        FROM work_days
        WHERE shift_id = ?
        "#,
    )
    .bind(shift_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut work_days = Vec::with_capacity(day_rows.len());
    for row in day_rows {
        let day = weekday_from_number(row.day).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "day".to_string(),
            source: format!("invalid weekday {}", row.day).into(),
        })?;
        let timings = sqlx::query_as::<_, WorkTiming>(
            r#"
            SELECT id, start_time, end_time, `extends`, working_minutes, break_start, break_end
            FROM work_timings
            WHERE work_day_id = ?
            ORDER BY start_time
            "#,
        )
        .bind(row.id)
        .fetch_all(&mut *conn)
        .await?;
        work_days.push(WorkDay {
            id: row.id,
            day,
            applicable_from: row.applicable_from,
            applicable_to: row.applicable_to,
            timings,
        });
    }

    Ok(WorkShift {
        id: shift_id,
        name,
        work_days,
    })
}

/// Loads the distinct shifts referenced by `assignments`.
pub async fn shifts_for(
    conn: &mut MySqlConnection,
    assignments: &[IndividualUserShift],
) -> AppResult<Vec<WorkShift>> {
    let mut ids: Vec<u64> = assignments.iter().map(|a| a.shift_id).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut shifts = Vec::with_capacity(ids.len());
    for id in ids {
        shifts.push(load_shift(conn, id).await?);
    }
    Ok(shifts)
}

pub async fn holidays_between(
    conn: &mut MySqlConnection,
    organization_id: u64,
    from: NaiveDate,
    to: NaiveDate,
) -> AppResult<Vec<Holiday>> {
    let rows = sqlx::query_as::<_, Holiday>(
        r#"
        SELECT id, organization_id, date, name, branch_id, division_id
        FROM holidays
        WHERE organization_id = ? AND date BETWEEN ? AND ?
        "#,
    )
    .bind(organization_id)
    .bind(from)
    .bind(to)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}
