use chrono::NaiveDateTime;
use sqlx::{FromRow, MySqlConnection};

use super::{from_secs, parse, secs};
use crate::attendance::recalibration::OvertimeWrite;
use crate::error::AppResult;
use crate::model::actor::Actor;
use crate::model::leave::CompensatoryRule;
use crate::model::overtime::{OvertimeDetail, OvertimeDetailHistory, OvertimeEntry, OvertimeSetting};

#[derive(FromRow)]
struct SettingRow {
    id: u64,
    organization_id: u64,
    name: String,
    enable_overtime: bool,
    overtime_calculation: String,
    applicable_before: u32,
    applicable_after: u32,
    overtime_applicable_only_after: String,
    deduct_overtime_after_for: String,
    flat_reject_value: u32,
    off_day_overtime: bool,
    paid_holiday_affect_overtime: bool,
    leave_affect_overtime: bool,
    overtime_after_offday: String,
    overtime_after_holiday: String,
    calculate_overtime_in_slots: bool,
    slot_duration_in_minutes: Option<u32>,
    slot_behavior_for_remainder: String,
    daily_overtime_limit: Option<u32>,
    off_day_overtime_limit: Option<u32>,
    holiday_overtime_limit: Option<u32>,
    leave_overtime_limit: Option<u32>,
}

impl TryFrom<SettingRow> for OvertimeSetting {
    type Error = sqlx::Error;

    fn try_from(r: SettingRow) -> Result<Self, Self::Error> {
        Ok(OvertimeSetting {
            id: r.id,
            organization_id: r.organization_id,
            name: r.name,
            enable_overtime: r.enable_overtime,
            overtime_calculation: parse("overtime_calculation", &r.overtime_calculation)?,
            applicable_before: r.applicable_before,
            applicable_after: r.applicable_after,
            overtime_applicable_only_after: parse(
                "overtime_applicable_only_after",
                &r.overtime_applicable_only_after,
            )?,
            deduct_overtime_after_for: parse(
                "deduct_overtime_after_for",
                &r.deduct_overtime_after_for,
            )?,
            flat_reject_value: r.flat_reject_value,
            off_day_overtime: r.off_day_overtime,
            paid_holiday_affect_overtime: r.paid_holiday_affect_overtime,
            leave_affect_overtime: r.leave_affect_overtime,
            overtime_after_offday: parse("overtime_after_offday", &r.overtime_after_offday)?,
            overtime_after_holiday: parse("overtime_after_holiday", &r.overtime_after_holiday)?,
            calculate_overtime_in_slots: r.calculate_overtime_in_slots,
            slot_duration_in_minutes: r.slot_duration_in_minutes,
            slot_behavior_for_remainder: parse(
                "slot_behavior_for_remainder",
                &r.slot_behavior_for_remainder,
            )?,
            daily_overtime_limit: r.daily_overtime_limit,
            off_day_overtime_limit: r.off_day_overtime_limit,
            holiday_overtime_limit: r.holiday_overtime_limit,
            leave_overtime_limit: r.leave_overtime_limit,
        })
    }
}

/// The user's own setting, else the organization default. `None` means
/// overtime is not configured for the user at all.
pub async fn setting_for_user(
    conn: &mut MySqlConnection,
    user_id: u64,
    organization_id: u64,
) -> AppResult<Option<OvertimeSetting>> {
    let row = sqlx::query_as::<_, SettingRow>(
        r#"
        SELECT s.id, s.organization_id, s.name, s.enable_overtime, s.overtime_calculation,
               s.applicable_before, s.applicable_after, s.overtime_applicable_only_after,
               s.deduct_overtime_after_for, s.flat_reject_value, s.off_day_overtime,
               s.paid_holiday_affect_overtime, s.leave_affect_overtime,
               s.overtime_after_offday, s.overtime_after_holiday,
               s.calculate_overtime_in_slots, s.slot_duration_in_minutes,
               s.slot_behavior_for_remainder, s.daily_overtime_limit,
               s.off_day_overtime_limit, s.holiday_overtime_limit, s.leave_overtime_limit
        FROM overtime_settings s
        LEFT JOIN user_overtime_settings u ON u.overtime_setting_id = s.id AND u.user_id = ?
        WHERE u.user_id IS NOT NULL OR (s.organization_id = ? AND s.is_default = TRUE)
        ORDER BY u.user_id IS NULL, s.id
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(organization_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(row.try_into()?)),
        None => Ok(None),
    }
}

#[derive(FromRow)]
struct EntryRow {
    id: u64,
    user_id: u64,
    timesheet_id: u64,
    overtime_setting_id: u64,
    claim_status: String,
    punch_in_overtime_secs: i64,
    punch_out_overtime_secs: i64,
    claimed_overtime_secs: Option<i64>,
}

/// Loads the entry for a sheet together with its detail.
pub async fn entry_for_timesheet(
    conn: &mut MySqlConnection,
    timesheet_id: u64,
) -> AppResult<Option<OvertimeEntry>> {
    fetch_entry(conn, timesheet_id, "").await
}

/// As [`entry_for_timesheet`], locking the entry row.
pub async fn entry_for_timesheet_for_update(
    conn: &mut MySqlConnection,
    timesheet_id: u64,
) -> AppResult<Option<OvertimeEntry>> {
    fetch_entry(conn, timesheet_id, " FOR UPDATE").await
}

fn entry_query(lock: &str) -> String {
    format!(
        r#"
        SELECT e.id, e.user_id, e.timesheet_id, e.overtime_setting_id, e.claim_status,
               d.punch_in_overtime_secs, d.punch_out_overtime_secs, d.claimed_overtime_secs
        FROM overtime_entries e
        JOIN overtime_entry_details d ON d.overtime_entry_id = e.id
        WHERE e.timesheet_id = ?{lock}
        "#
    )
}

async fn fetch_entry(
    conn: &mut MySqlConnection,
    timesheet_id: u64,
    lock: &str,
) -> AppResult<Option<OvertimeEntry>> {
    let sql = entry_query(lock);
    let row = sqlx::query_as::<_, EntryRow>(&sql)
        .bind(timesheet_id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(r) = row else {
        return Ok(None);
    };
    Ok(Some(OvertimeEntry {
        id: r.id,
        user_id: r.user_id,
        timesheet_id: r.timesheet_id,
        overtime_setting_id: r.overtime_setting_id,
        claim_status: parse("claim_status", &r.claim_status)?,
        detail: OvertimeDetail {
            punch_in_overtime: from_secs(r.punch_in_overtime_secs),
            punch_out_overtime: from_secs(r.punch_out_overtime_secs),
            claimed_overtime: r.claimed_overtime_secs.map(from_secs),
        },
    }))
}

async fn insert_detail(conn: &mut MySqlConnection, entry_id: u64, detail: &OvertimeDetail) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO overtime_entry_details
            (overtime_entry_id, punch_in_overtime_secs, punch_out_overtime_secs, claimed_overtime_secs)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(entry_id)
    .bind(secs(detail.punch_in_overtime))
    .bind(secs(detail.punch_out_overtime))
    .bind(detail.claimed_overtime.map(secs))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_history(conn: &mut MySqlConnection, h: &OvertimeDetailHistory) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO overtime_detail_histories
            (overtime_entry_id, actor_id,
             previous_punch_in_overtime_secs, previous_punch_out_overtime_secs,
             current_punch_in_overtime_secs, current_punch_out_overtime_secs,
             remarks, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(h.entry_id)
    .bind(h.actor.user_id())
    .bind(secs(h.previous_punch_in_overtime))
    .bind(secs(h.previous_punch_out_overtime))
    .bind(secs(h.current_punch_in_overtime))
    .bind(secs(h.current_punch_out_overtime))
    .bind(&h.remarks)
    .bind(h.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Persists a planned write. Returns the id of a created entry.
pub async fn apply_write(conn: &mut MySqlConnection, write: &OvertimeWrite) -> AppResult<Option<u64>> {
    match write {
        OvertimeWrite::Create(entry) => {
            let result = sqlx::query(
                r#"
                INSERT INTO overtime_entries (user_id, timesheet_id, overtime_setting_id, claim_status)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(entry.user_id)
            .bind(entry.timesheet_id)
            .bind(entry.overtime_setting_id)
            .bind(entry.claim_status.as_ref())
            .execute(&mut *conn)
            .await?;
            let id = result.last_insert_id();
            insert_detail(conn, id, &entry.detail).await?;
            Ok(Some(id))
        }
        OvertimeWrite::Update { entry, history } => {
            sqlx::query("UPDATE overtime_entries SET overtime_setting_id = ? WHERE id = ?")
                .bind(entry.overtime_setting_id)
                .bind(entry.id)
                .execute(&mut *conn)
                .await?;
            sqlx::query(
                r#"
                UPDATE overtime_entry_details
                SET punch_in_overtime_secs = ?, punch_out_overtime_secs = ?, claimed_overtime_secs = ?
                WHERE overtime_entry_id = ?
                "#,
            )
            .bind(secs(entry.detail.punch_in_overtime))
            .bind(secs(entry.detail.punch_out_overtime))
            .bind(entry.detail.claimed_overtime.map(secs))
            .bind(entry.id)
            .execute(&mut *conn)
            .await?;
            insert_history(conn, history).await?;
            Ok(None)
        }
        OvertimeWrite::Delete(entry) => {
            sqlx::query("DELETE FROM overtime_entries WHERE id = ?")
                .bind(entry.id)
                .execute(&mut *conn)
                .await?;
            Ok(None)
        }
        OvertimeWrite::Unchanged | OvertimeWrite::Locked(_) => Ok(None),
    }
}

#[derive(FromRow)]
struct HistoryRow {
    overtime_entry_id: u64,
    actor_id: Option<u64>,
    previous_punch_in_overtime_secs: i64,
    previous_punch_out_overtime_secs: i64,
    current_punch_in_overtime_secs: i64,
    current_punch_out_overtime_secs: i64,
    remarks: String,
    created_at: NaiveDateTime,
}

pub async fn history_for_entry(
    conn: &mut MySqlConnection,
    entry_id: u64,
) -> AppResult<Vec<OvertimeDetailHistory>> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT overtime_entry_id, actor_id,
               previous_punch_in_overtime_secs, previous_punch_out_overtime_secs,
               current_punch_in_overtime_secs, current_punch_out_overtime_secs,
               remarks, created_at
        FROM overtime_detail_histories
        WHERE overtime_entry_id = ?
        ORDER BY id
        "#,
    )
    .bind(entry_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| OvertimeDetailHistory {
            entry_id: r.overtime_entry_id,
            actor: Actor::from_user_id(r.actor_id),
            previous_punch_in_overtime: from_secs(r.previous_punch_in_overtime_secs),
            previous_punch_out_overtime: from_secs(r.previous_punch_out_overtime_secs),
            current_punch_in_overtime: from_secs(r.current_punch_in_overtime_secs),
            current_punch_out_overtime: from_secs(r.current_punch_out_overtime_secs),
            remarks: r.remarks,
            created_at: r.created_at,
        })
        .collect())
}

/// Tiers of the user's active compensatory leave rule, used for
/// off-day overtime deduction.
pub async fn compensatory_rules_for_user(
    conn: &mut MySqlConnection,
    user_id: u64,
) -> AppResult<Vec<CompensatoryRule>> {
    let rows = sqlx::query_as::<_, CompensatoryRule>(
        r#"
        SELECT cr.id, cr.hours_in_off_day, cr.balance_to_grant
        FROM compensatory_rules cr
        JOIN leave_rules lr ON lr.id = cr.leave_rule_id
        JOIN leave_accounts la ON la.rule_id = lr.id
        WHERE la.user_id = ? AND la.is_archived = FALSE AND lr.category = 'compensatory'
        ORDER BY cr.hours_in_off_day
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_update_variant_locks() {
        assert!(!entry_query("").contains("FOR UPDATE"));
        assert!(entry_query(" FOR UPDATE").trim_end().ends_with("e.timesheet_id = ? FOR UPDATE"));
    }
}
