use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{FromRow, MySqlConnection};

use super::parse;
use crate::error::{AppError, AppResult};
use crate::model::actor::Actor;
use crate::model::leave::{
    AccrualBasis, AccumulationRule, CollapsibleRule, CompensatoryLeaveAccount, CompensatoryRule, DeductionRule,
    LeaveAccount, LeaveAccountHistory, LeaveEncashment, LeaveRequest, LeaveRule, RenewalRule,
    RuleInterval,
};

#[derive(FromRow)]
struct RuleRow {
    id: u64,
    organization_id: u64,
    name: String,
    category: String,
    max_balance: Option<f64>,
    min_balance: Option<f64>,
    accrual_balance_added: Option<f64>,
    accrual_every: Option<u32>,
    accrual_unit: Option<String>,
    accrual_basis: Option<String>,
    renewal_initial_balance: Option<f64>,
    renewal_every: Option<u32>,
    renewal_unit: Option<String>,
    max_balance_forwarded: Option<f64>,
    max_balance_encashed: Option<f64>,
    is_collapsible: bool,
    deduction_balance: Option<f64>,
    deduction_every: Option<u32>,
    deduction_unit: Option<String>,
    collapse_after_every: Option<u32>,
    collapse_after_unit: Option<String>,
}

fn interval(
    column: &str,
    every: Option<u32>,
    unit: Option<&str>,
) -> Result<Option<RuleInterval>, sqlx::Error> {
    match (every, unit) {
        (Some(every), Some(unit)) if every > 0 => Ok(Some(RuleInterval {
            every,
            unit: parse(column, unit)?,
        })),
        _ => Ok(None),
    }
}

impl RuleRow {
    fn into_rule(self, compensatory: Vec<CompensatoryRule>) -> Result<LeaveRule, sqlx::Error> {
        let accumulation = match (
            self.accrual_balance_added,
            interval("accrual_unit", self.accrual_every, self.accrual_unit.as_deref())?,
        ) {
            (Some(balance_added), Some(interval)) => Some(AccumulationRule {
                balance_added,
                interval,
                basis: match self.accrual_basis.as_deref() {
                    Some(basis) => parse("accrual_basis", basis)?,
                    None => AccrualBasis::Calendar,
                },
            }),
            _ => None,
        };
        let renewal = match (
            self.renewal_initial_balance,
            interval("renewal_unit", self.renewal_every, self.renewal_unit.as_deref())?,
        ) {
            (Some(initial_balance), Some(interval)) => Some(RenewalRule {
                initial_balance,
                interval,
                max_balance_forwarded: self.max_balance_forwarded,
                max_balance_encashed: self.max_balance_encashed,
                is_collapsible: self.is_collapsible,
            }),
            _ => None,
        };
        let deduction = match (
            self.deduction_balance,
            interval("deduction_unit", self.deduction_every, self.deduction_unit.as_deref())?,
        ) {
            (Some(balance_deducted), Some(interval)) => Some(DeductionRule {
                balance_deducted,
                interval,
            }),
            _ => None,
        };
        let collapsible = interval(
            "collapse_after_unit",
            self.collapse_after_every,
            self.collapse_after_unit.as_deref(),
        )?
        .map(|collapse_after| CollapsibleRule { collapse_after });

        Ok(LeaveRule {
            id: self.id,
            organization_id: self.organization_id,
            name: self.name,
            category: parse("category", &self.category)?,
            max_balance: self.max_balance,
            min_balance: self.min_balance,
            accumulation,
            renewal,
            deduction,
            compensatory,
            collapsible,
        })
    }
}

pub async fn rule(conn: &mut MySqlConnection, rule_id: u64) -> AppResult<LeaveRule> {
    let row = sqlx::query_as::<_, RuleRow>(
        r#"
        SELECT id, organization_id, name, category, max_balance, min_balance,
               accrual_balance_added, accrual_every, accrual_unit, accrual_basis,
               renewal_initial_balance, renewal_every, renewal_unit,
               max_balance_forwarded, max_balance_encashed, is_collapsible,
               deduction_balance, deduction_every, deduction_unit,
               collapse_after_every, collapse_after_unit
        FROM leave_rules
        WHERE id = ?
        "#,
    )
    .bind(rule_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found(format!("leave rule {rule_id}")))?;

    let compensatory = sqlx::query_as::<_, CompensatoryRule>(
        r#"
        SELECT id, hours_in_off_day, balance_to_grant
        FROM compensatory_rules
        WHERE leave_rule_id = ?
        ORDER BY hours_in_off_day
        "#,
    )
    .bind(rule_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(row.into_rule(compensatory)?)
}

const ACCOUNT_COLUMNS: &str = r#"
    id, user_id, rule_id, balance, usable_balance, is_archived,
    last_accrued, last_renewed, last_deducted, assigned_on
"#;

pub async fn account(conn: &mut MySqlConnection, account_id: u64) -> AppResult<LeaveAccount> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM leave_accounts WHERE id = ?");
    sqlx::query_as::<_, LeaveAccount>(&sql)
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("leave account {account_id}")))
}

pub async fn account_for_update(
    conn: &mut MySqlConnection,
    account_id: u64,
) -> AppResult<LeaveAccount> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM leave_accounts WHERE id = ? FOR UPDATE");
    sqlx::query_as::<_, LeaveAccount>(&sql)
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("leave account {account_id}")))
}

pub async fn active_account_ids(conn: &mut MySqlConnection) -> AppResult<Vec<u64>> {
    let ids = sqlx::query_scalar("SELECT id FROM leave_accounts WHERE is_archived = FALSE ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;
    Ok(ids)
}

pub async fn insert_account(conn: &mut MySqlConnection, account: &LeaveAccount) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO leave_accounts
            (user_id, rule_id, balance, usable_balance, is_archived,
             last_accrued, last_renewed, last_deducted, assigned_on)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(account.user_id)
    .bind(account.rule_id)
    .bind(account.balance)
    .bind(account.usable_balance)
    .bind(account.is_archived)
    .bind(account.last_accrued)
    .bind(account.last_renewed)
    .bind(account.last_deducted)
    .bind(account.assigned_on)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id())
}

pub async fn save_account(conn: &mut MySqlConnection, account: &LeaveAccount) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE leave_accounts
        SET balance = ?, usable_balance = ?, is_archived = ?,
            last_accrued = ?, last_renewed = ?, last_deducted = ?
        WHERE id = ?
        "#,
    )
    .bind(account.balance)
    .bind(account.usable_balance)
    .bind(account.is_archived)
    .bind(account.last_accrued)
    .bind(account.last_renewed)
    .bind(account.last_deducted)
    .bind(account.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_history(
    conn: &mut MySqlConnection,
    history: &LeaveAccountHistory,
) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO leave_account_histories
            (account_id, user_id, action, previous_balance, previous_usable_balance,
             new_balance, new_usable_balance, accrued, renewed, carry_forward,
             encashed, deducted, remarks, actor_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(history.account_id)
    .bind(history.user_id)
    .bind(history.action.as_ref())
    .bind(history.previous_balance)
    .bind(history.previous_usable_balance)
    .bind(history.new_balance)
    .bind(history.new_usable_balance)
    .bind(history.accrued)
    .bind(history.renewed)
    .bind(history.carry_forward)
    .bind(history.encashed)
    .bind(history.deducted)
    .bind(&history.remarks)
    .bind(history.actor.user_id())
    .bind(history.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id())
}

#[derive(FromRow)]
struct HistoryRow {
    id: u64,
    account_id: u64,
    user_id: u64,
    action: String,
    previous_balance: f64,
    previous_usable_balance: f64,
    new_balance: f64,
    new_usable_balance: f64,
    accrued: Option<f64>,
    renewed: Option<f64>,
    carry_forward: Option<f64>,
    encashed: Option<f64>,
    deducted: Option<f64>,
    remarks: String,
    actor_id: Option<u64>,
    created_at: NaiveDateTime,
}

/// Full ledger of one account in creation order.
pub async fn history_for(
    conn: &mut MySqlConnection,
    account_id: u64,
) -> AppResult<Vec<LeaveAccountHistory>> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT id, account_id, user_id, action, previous_balance, previous_usable_balance,
               new_balance, new_usable_balance, accrued, renewed, carry_forward,
               encashed, deducted, remarks, actor_id, created_at
        FROM leave_account_histories
        WHERE account_id = ?
        ORDER BY id
        "#,
    )
    .bind(account_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|r| -> AppResult<LeaveAccountHistory> {
            Ok(LeaveAccountHistory {
                id: r.id,
                account_id: r.account_id,
                user_id: r.user_id,
                action: parse("action", &r.action)?,
                previous_balance: r.previous_balance,
                previous_usable_balance: r.previous_usable_balance,
                new_balance: r.new_balance,
                new_usable_balance: r.new_usable_balance,
                accrued: r.accrued,
                renewed: r.renewed,
                carry_forward: r.carry_forward,
                encashed: r.encashed,
                deducted: r.deducted,
                remarks: r.remarks,
                actor: Actor::from_user_id(r.actor_id),
                created_at: r.created_at,
            })
        })
        .collect()
}

pub async fn compensatory_rows_for_update(
    conn: &mut MySqlConnection,
    leave_account_id: u64,
) -> AppResult<Vec<CompensatoryLeaveAccount>> {
    let rows = sqlx::query_as::<_, CompensatoryLeaveAccount>(
        r#"
        SELECT id, leave_account_id, timesheet_id, leave_for, balance_granted, balance_consumed
        FROM compensatory_leave_accounts
        WHERE leave_account_id = ?
        ORDER BY leave_for, id
        FOR UPDATE
        "#,
    )
    .bind(leave_account_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn insert_compensatory_row(
    conn: &mut MySqlConnection,
    row: &CompensatoryLeaveAccount,
) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO compensatory_leave_accounts
            (leave_account_id, timesheet_id, leave_for, balance_granted, balance_consumed)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.leave_account_id)
    .bind(row.timesheet_id)
    .bind(row.leave_for)
    .bind(row.balance_granted)
    .bind(row.balance_consumed)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id())
}

pub async fn save_compensatory_consumed(
    conn: &mut MySqlConnection,
    row: &CompensatoryLeaveAccount,
) -> AppResult<()> {
    sqlx::query("UPDATE compensatory_leave_accounts SET balance_consumed = ? WHERE id = ?")
        .bind(row.balance_consumed)
        .bind(row.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn insert_encashment(
    conn: &mut MySqlConnection,
    encashment: &LeaveEncashment,
) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO leave_encashments (user_id, account_id, balance, status, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(encashment.user_id)
    .bind(encashment.account_id)
    .bind(encashment.balance)
    .bind(encashment.status.as_ref())
    .bind(encashment.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id())
}

#[derive(FromRow)]
struct RequestRow {
    id: u64,
    user_id: u64,
    leave_account_id: u64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    part_of_day: String,
    balance: f64,
    status: String,
    details: String,
    acted_by: Option<u64>,
    acted_at: Option<NaiveDateTime>,
}

impl TryFrom<RequestRow> for LeaveRequest {
    type Error = sqlx::Error;

    fn try_from(r: RequestRow) -> Result<Self, Self::Error> {
        Ok(LeaveRequest {
            id: r.id,
            user_id: r.user_id,
            leave_account_id: r.leave_account_id,
            start: r.start_date,
            end: r.end_date,
            part_of_day: parse("part_of_day", &r.part_of_day)?,
            balance: r.balance,
            status: parse("status", &r.status)?,
            details: r.details,
            acted_by: r.acted_at.map(|_| Actor::from_user_id(r.acted_by)),
            acted_at: r.acted_at,
        })
    }
}

const REQUEST_COLUMNS: &str = r#"
    id, user_id, leave_account_id, start_date, end_date, part_of_day,
    balance, status, details, acted_by, acted_at
"#;

pub async fn request(conn: &mut MySqlConnection, request_id: u64) -> AppResult<LeaveRequest> {
    fetch_request(conn, request_id, "").await
}

pub async fn request_for_update(
    conn: &mut MySqlConnection,
    request_id: u64,
) -> AppResult<LeaveRequest> {
    fetch_request(conn, request_id, " FOR UPDATE").await
}

async fn fetch_request(
    conn: &mut MySqlConnection,
    request_id: u64,
    lock: &str,
) -> AppResult<LeaveRequest> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM leave_requests WHERE id = ?{lock}");
    let row = sqlx::query_as::<_, RequestRow>(&sql)
        .bind(request_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("leave request {request_id}")))?;
    Ok(LeaveRequest::try_from(row)?)
}

/// Approved requests of the user that cover `date`.
pub async fn approved_requests_covering(
    conn: &mut MySqlConnection,
    user_id: u64,
    date: NaiveDate,
) -> AppResult<Vec<LeaveRequest>> {
    let sql = format!(
        r#"
        SELECT {REQUEST_COLUMNS} FROM leave_requests
        WHERE user_id = ? AND status = 'approved' AND start_date <= ? AND end_date >= ?
        ORDER BY id
        "#
    );
    let rows = sqlx::query_as::<_, RequestRow>(&sql)
        .bind(user_id)
        .bind(date)
        .bind(date)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter()
        .map(|r| LeaveRequest::try_from(r).map_err(AppError::from))
        .collect()
}

pub async fn insert_request(conn: &mut MySqlConnection, request: &LeaveRequest) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO leave_requests
            (user_id, leave_account_id, start_date, end_date, part_of_day, balance, status, details)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(request.user_id)
    .bind(request.leave_account_id)
    .bind(request.start)
    .bind(request.end)
    .bind(request.part_of_day.as_ref())
    .bind(request.balance)
    .bind(request.status.as_ref())
    .bind(&request.details)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id())
}

pub async fn update_request_status(
    conn: &mut MySqlConnection,
    request: &LeaveRequest,
) -> AppResult<()> {
    sqlx::query("UPDATE leave_requests SET status = ?, acted_by = ?, acted_at = ? WHERE id = ?")
        .bind(request.status.as_ref())
        .bind(request.acted_by.and_then(|a| a.user_id()))
        .bind(request.acted_at)
        .bind(request.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::leave::{IntervalUnit, LeaveCategory};

    fn row() -> RuleRow {
        RuleRow {
            id: 1,
            organization_id: 1,
            name: "Annual".into(),
            category: "general".into(),
            max_balance: Some(20.0),
            min_balance: None,
            accrual_balance_added: Some(1.5),
            accrual_every: Some(1),
            accrual_unit: Some("months".into()),
            accrual_basis: None,
            renewal_initial_balance: Some(12.0),
            renewal_every: Some(1),
            renewal_unit: Some("years".into()),
            max_balance_forwarded: Some(3.0),
            max_balance_encashed: None,
            is_collapsible: true,
            deduction_balance: None,
            deduction_every: Some(3),
            deduction_unit: Some("months".into()),
            collapse_after_every: None,
            collapse_after_unit: None,
        }
    }

    #[test]
    fn flattened_columns_rebuild_sub_rules() {
        let rule = row().into_rule(Vec::new()).unwrap();
        assert_eq!(rule.category, LeaveCategory::General);

        let accumulation = rule.accumulation.unwrap();
        assert_eq!(accumulation.interval.unit, IntervalUnit::Months);
        assert_eq!(accumulation.basis, AccrualBasis::Calendar);

        let renewal = rule.renewal.unwrap();
        assert_eq!(renewal.initial_balance, 12.0);
        assert_eq!(renewal.max_balance_forwarded, Some(3.0));
        assert!(renewal.is_collapsible);

        // an interval without an amount is not a rule
        assert!(rule.deduction.is_none());
        assert!(rule.collapsible.is_none());
    }

    #[test]
    fn unknown_unit_is_a_decode_error() {
        let mut r = row();
        r.renewal_unit = Some("fortnights".into());
        assert!(matches!(
            r.into_rule(Vec::new()),
            Err(sqlx::Error::ColumnDecode { ref index, .. }) if index == "renewal_unit"
        ));
    }
}
