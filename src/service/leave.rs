use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::{MySqlConnection, MySqlPool};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::attendance::{self as attendance_service, Calendar};
use crate::attendance::recalibration::Trigger;
use crate::error::{AppError, AppResult};
use crate::leave::{compensatory, ledger};
use crate::model::actor::Actor;
use crate::model::leave::{
    LeaveAccount, LeaveAccountHistory, LeaveRequest, LeaveRequestStatus, PartOfDay,
};
use crate::notification::{self, Notification};
use crate::repo;

/// Persists the account and its paired history row; the caller commits.
async fn record(
    conn: &mut MySqlConnection,
    account: &LeaveAccount,
    history: &LeaveAccountHistory,
    notifications: &mut Vec<Notification>,
) -> AppResult<()> {
    repo::leave::save_account(conn, account).await?;
    repo::leave::insert_history(conn, history).await?;
    notifications.extend(Notification::for_history(history));
    Ok(())
}

pub async fn assign_account(
    pool: &MySqlPool,
    user_id: u64,
    rule_id: u64,
    initial_balance: Option<f64>,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<LeaveAccount> {
    let mut tx = pool.begin().await?;
    repo::shift::user_context(&mut tx, user_id).await?;
    let rule = repo::leave::rule(&mut tx, rule_id).await?;

    let (mut account, mut history) = ledger::assign(user_id, &rule, initial_balance, actor, now)?;
    account.id = repo::leave::insert_account(&mut tx, &account).await?;
    history.account_id = account.id;
    repo::leave::insert_history(&mut tx, &history).await?;
    tx.commit().await?;

    info!(user_id, account_id = account.id, rule_id, "Leave account assigned");
    notification::dispatch(Notification::for_history(&history).into_iter().collect());
    Ok(account)
}

pub struct NewLeaveRequest {
    pub user_id: u64,
    pub leave_account_id: u64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub part_of_day: PartOfDay,
    pub balance: f64,
    pub details: String,
}

/// Files a request. Balance is checked, not reserved; the debit happens on
/// approval.
pub async fn create_request(pool: &MySqlPool, new: NewLeaveRequest) -> AppResult<LeaveRequest> {
    if new.start > new.end {
        return Err(AppError::InvalidBalance(format!(
            "leave starts {} after it ends {}",
            new.start, new.end
        )));
    }
    if new.part_of_day != PartOfDay::Full && new.start != new.end {
        return Err(AppError::InvalidBalance(
            "half-day leave must cover a single date".to_string(),
        ));
    }
    if new.balance <= 0.0 || !ledger::is_half_step(new.balance) {
        return Err(AppError::InvalidBalance(format!(
            "{} is not a positive multiple of 0.5",
            new.balance
        )));
    }

    let mut conn = pool.acquire().await?;
    let account = repo::leave::account(&mut conn, new.leave_account_id).await?;
    if account.user_id != new.user_id {
        return Err(AppError::not_found(format!(
            "leave account {} for user {}",
            account.id, new.user_id
        )));
    }
    account.ensure_active()?;
    if account.usable_balance < new.balance {
        return Err(AppError::InsufficientBalance {
            account_id: account.id,
            requested: new.balance,
            usable: account.usable_balance,
        });
    }

    let mut request = LeaveRequest {
        id: 0,
        user_id: new.user_id,
        leave_account_id: new.leave_account_id,
        start: new.start,
        end: new.end,
        part_of_day: new.part_of_day,
        balance: new.balance,
        status: LeaveRequestStatus::Requested,
        details: new.details,
        acted_by: None,
        acted_at: None,
    };
    request.id = repo::leave::insert_request(&mut conn, &request).await?;
    info!(request_id = request.id, user_id = request.user_id, "Leave request filed");
    Ok(request)
}

/// Re-derives every elapsed date of the request, leave coefficient
/// included, then recalibrates overtime. Later dates pick up their leave
/// when their sheet is next ensured.
async fn apply_leave_days(
    conn: &mut MySqlConnection,
    request: &LeaveRequest,
    actor: Actor,
    trigger: Trigger,
    now: NaiveDateTime,
    notifications: &mut Vec<Notification>,
) -> AppResult<()> {
    let today = now.date();
    if request.start > today {
        return Ok(());
    }
    let calendar = Calendar::load(conn, request.user_id).await?;

    for date in request.dates().filter(|d| *d <= today) {
        let Some(mut ts) = calendar.ensure_sheet(conn, date, false).await? else {
            continue;
        };

        let write =
            attendance_service::recalibrate(conn, &calendar.user, &mut ts, actor, trigger, now)
                .await?;
        notifications.extend(Notification::for_overtime(
            ts.id,
            ts.user_id,
            date,
            &write,
            trigger,
        ));
    }
    Ok(())
}

/// Approval pipeline: lock, debit, mark timesheets, recalibrate, commit,
/// notify.
pub async fn approve_request(
    pool: &MySqlPool,
    request_id: u64,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<LeaveRequest> {
    let mut tx = pool.begin().await?;
    let mut notifications = Vec::new();

    let mut request = repo::leave::request_for_update(&mut tx, request_id).await?;
    request.transition(LeaveRequestStatus::Approved, actor, now)?;
    let mut account = repo::leave::account_for_update(&mut tx, request.leave_account_id).await?;
    let rule = repo::leave::rule(&mut tx, account.rule_id).await?;

    if rule.is_compensatory() {
        let mut rows = repo::leave::compensatory_rows_for_update(&mut tx, account.id).await?;
        let moves = compensatory::consume(account.id, &mut rows, request.balance)?;
        for row in rows.iter().filter(|r| moves.iter().any(|m| m.compensatory_id == r.id)) {
            repo::leave::save_compensatory_consumed(&mut tx, row).await?;
        }
    }
    let history = ledger::consume_for_request(&mut account, &rule, &request, actor, now)?;
    record(&mut tx, &account, &history, &mut notifications).await?;

    repo::leave::update_request_status(&mut tx, &request).await?;
    apply_leave_days(&mut tx, &request, actor, Trigger::LeaveApproved, now, &mut notifications)
        .await?;

    tx.commit().await?;

    info!(request_id, account_id = account.id, %actor, "Leave request approved");
    notifications.insert(0, Notification::leave_status(&request, actor));
    notification::dispatch(notifications);
    Ok(request)
}

pub async fn deny_request(
    pool: &MySqlPool,
    request_id: u64,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<LeaveRequest> {
    let mut tx = pool.begin().await?;
    let mut request = repo::leave::request_for_update(&mut tx, request_id).await?;
    request.transition(LeaveRequestStatus::Denied, actor, now)?;
    repo::leave::update_request_status(&mut tx, &request).await?;
    tx.commit().await?;

    info!(request_id, %actor, "Leave request denied");
    notification::dispatch(vec![Notification::leave_status(&request, actor)]);
    Ok(request)
}

/// Cancels a request. An approved one has its debit reversed and its dates
/// re-derived from whatever approved leave remains.
pub async fn cancel_request(
    pool: &MySqlPool,
    request_id: u64,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<LeaveRequest> {
    let mut tx = pool.begin().await?;
    let mut notifications = Vec::new();

    let mut request = repo::leave::request_for_update(&mut tx, request_id).await?;
    let was_approved = request.status == LeaveRequestStatus::Approved;
    request.transition(LeaveRequestStatus::Cancelled, actor, now)?;

    if was_approved {
        let mut account = repo::leave::account_for_update(&mut tx, request.leave_account_id).await?;
        let rule = repo::leave::rule(&mut tx, account.rule_id).await?;
        if rule.is_compensatory() {
            let mut rows = repo::leave::compensatory_rows_for_update(&mut tx, account.id).await?;
            let moves = compensatory::refund(account.id, &mut rows, request.balance)?;
            for row in rows.iter().filter(|r| moves.iter().any(|m| m.compensatory_id == r.id)) {
                repo::leave::save_compensatory_consumed(&mut tx, row).await?;
            }
        }
        let history = ledger::refund_for_request(&mut account, &rule, &request, actor, now)?;
        record(&mut tx, &account, &history, &mut notifications).await?;
    }

    repo::leave::update_request_status(&mut tx, &request).await?;
    if was_approved {
        apply_leave_days(&mut tx, &request, actor, Trigger::LeaveCancelled, now, &mut notifications)
            .await?;
    }

    tx.commit().await?;

    info!(request_id, was_approved, %actor, "Leave request cancelled");
    notifications.insert(0, Notification::leave_status(&request, actor));
    notification::dispatch(notifications);
    Ok(request)
}

pub async fn manual_edit(
    pool: &MySqlPool,
    account_id: u64,
    balance: f64,
    usable_balance: f64,
    remarks: &str,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<LeaveAccount> {
    let mut tx = pool.begin().await?;
    let mut notifications = Vec::new();
    let mut account = repo::leave::account_for_update(&mut tx, account_id).await?;
    let history = ledger::manual_edit(&mut account, balance, usable_balance, remarks, actor, now)?;
    record(&mut tx, &account, &history, &mut notifications).await?;
    tx.commit().await?;

    info!(account_id, %actor, balance, usable_balance, "Leave balance edited");
    notification::dispatch(notifications);
    Ok(account)
}

pub async fn archive_account(
    pool: &MySqlPool,
    account_id: u64,
    remarks: &str,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<LeaveAccount> {
    let mut tx = pool.begin().await?;
    let mut notifications = Vec::new();
    let mut account = repo::leave::account_for_update(&mut tx, account_id).await?;
    let history = ledger::archive(&mut account, actor, remarks, now)?;
    record(&mut tx, &account, &history, &mut notifications).await?;
    tx.commit().await?;

    info!(account_id, %actor, "Leave account archived");
    notification::dispatch(notifications);
    Ok(account)
}

pub async fn leave_request(pool: &MySqlPool, request_id: u64) -> AppResult<LeaveRequest> {
    let mut conn = pool.acquire().await?;
    repo::leave::request(&mut conn, request_id).await
}

pub struct AccountLedger {
    pub account: LeaveAccount,
    pub history: Vec<LeaveAccountHistory>,
    pub chain_break: Option<ledger::ChainBreak>,
}

/// Account with its full history and the first broken link, if any.
pub async fn account_ledger(pool: &MySqlPool, account_id: u64) -> AppResult<AccountLedger> {
    let mut conn = pool.acquire().await?;
    let account = repo::leave::account(&mut conn, account_id).await?;
    let history = repo::leave::history_for(&mut conn, account_id).await?;
    let chain_break = ledger::verify_chain(&history);
    if let Some(b) = &chain_break {
        warn!(
            account_id,
            row_id = b.row_id,
            expected_balance = b.expected_balance,
            found_balance = b.found_balance,
            "Leave history chain is broken"
        );
    }
    Ok(AccountLedger {
        account,
        history,
        chain_break,
    })
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct CycleReport {
    pub accounts: usize,
    pub accrued: usize,
    pub renewed: usize,
    pub deducted: usize,
    pub encashments: usize,
    pub compensatory_granted: usize,
    pub compensatory_collapsed: usize,
    pub failed: Vec<u64>,
}

impl CycleReport {
    fn absorb(&mut self, other: CycleReport) {
        self.accrued += other.accrued;
        self.renewed += other.renewed;
        self.deducted += other.deducted;
        self.encashments += other.encashments;
        self.compensatory_granted += other.compensatory_granted;
        self.compensatory_collapsed += other.compensatory_collapsed;
    }
}

/// One account's scheduled ledger work. Runs in its own transaction.
async fn run_account_cycle(
    pool: &MySqlPool,
    account_id: u64,
    lookback_days: i64,
    now: NaiveDateTime,
) -> AppResult<(CycleReport, Vec<Notification>)> {
    let today = now.date();
    let actor = Actor::System;
    let mut tx = pool.begin().await?;
    let mut report = CycleReport::default();
    let mut notifications = Vec::new();

    let mut account = repo::leave::account_for_update(&mut tx, account_id).await?;
    if account.is_archived {
        return Ok((report, notifications));
    }
    let rule = repo::leave::rule(&mut tx, account.rule_id).await?;
    let before = account.clone();

    let worked = match account.last_accrued {
        Some(since) => repo::timesheet::worked_days_since(&mut tx, account.user_id, since).await?,
        None => {
            repo::timesheet::worked_days_since(&mut tx, account.user_id, account.assigned_on)
                .await?
        }
    };
    if ledger::accrual_due(&account, &rule, today, worked) {
        if let Some(history) = ledger::accrue(&mut account, &rule, actor, now)? {
            record(&mut tx, &account, &history, &mut notifications).await?;
            report.accrued += 1;
        }
    }

    if ledger::renewal_due(&account, &rule, today) {
        if let Some(renewal) = ledger::renew(&mut account, &rule, actor, now)? {
            record(&mut tx, &account, &renewal.history, &mut notifications).await?;
            if let Some(encashment) = &renewal.encashment {
                repo::leave::insert_encashment(&mut tx, encashment).await?;
                report.encashments += 1;
            }
            report.renewed += 1;
        }
    }

    if ledger::deduction_due(&account, &rule, today) {
        if let Some(history) = ledger::deduct(&mut account, &rule, actor, now)? {
            record(&mut tx, &account, &history, &mut notifications).await?;
            report.deducted += 1;
        }
    }

    if rule.is_compensatory() {
        let mut rows = repo::leave::compensatory_rows_for_update(&mut tx, account.id).await?;
        let (from, to) = grant_window(today, lookback_days);
        let sheets = repo::timesheet::worked_off_days(&mut tx, account.user_id, from, to).await?;
        for ts in &sheets {
            if let Some((mut row, history)) =
                compensatory::grant(&mut account, &rule, ts, &rows, actor, now)?
            {
                record(&mut tx, &account, &history, &mut notifications).await?;
                row.id = repo::leave::insert_compensatory_row(&mut tx, &row).await?;
                rows.push(row);
                report.compensatory_granted += 1;
            }
        }

        let collapsed = compensatory::collapse(&mut account, &rule, &mut rows, today, actor, now)?;
        for (day, history) in &collapsed {
            record(&mut tx, &account, history, &mut notifications).await?;
            if let Some(row) = rows.iter().find(|r| r.id == day.compensatory_id) {
                repo::leave::save_compensatory_consumed(&mut tx, row).await?;
            }
        }
        report.compensatory_collapsed += collapsed.len();
    }

    // due dates may advance without a history row (accrual capped at max)
    if account != before {
        repo::leave::save_account(&mut tx, &account).await?;
    }
    tx.commit().await?;
    Ok((report, notifications))
}

/// Off days considered for compensatory grants. Today's sheet may still
/// take punches, so the window closes yesterday.
fn grant_window(today: NaiveDate, lookback_days: i64) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(lookback_days), today - Duration::days(1))
}

/// Scheduled sweep over every active account. A failing account is logged
/// and does not stop the others.
pub async fn run_cycle(pool: &MySqlPool, lookback_days: i64, now: NaiveDateTime) -> AppResult<CycleReport> {
    let ids = {
        let mut conn = pool.acquire().await?;
        repo::leave::active_account_ids(&mut conn).await?
    };

    let mut report = CycleReport {
        accounts: ids.len(),
        ..Default::default()
    };
    for account_id in ids {
        match run_account_cycle(pool, account_id, lookback_days, now).await {
            Ok((done, notifications)) => {
                report.absorb(done);
                notification::dispatch(notifications);
            }
            Err(e) => {
                error!(account_id, error = %e, "Leave cycle failed for account");
                report.failed.push(account_id);
            }
        }
    }

    info!(
        accounts = report.accounts,
        accrued = report.accrued,
        renewed = report.renewed,
        deducted = report.deducted,
        failed = report.failed.len(),
        "Leave cycle finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_window_closes_before_today() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let (from, to) = grant_window(today, 30);
        assert_eq!(from, NaiveDate::from_ymd_opt(2024, 2, 8).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2024, 3, 8).unwrap());
        assert!(!(from..=to).contains(&today));
    }

    #[test]
    fn cycle_report_sums_accounts() {
        let mut report = CycleReport {
            accounts: 2,
            ..Default::default()
        };
        report.absorb(CycleReport {
            accrued: 1,
            deducted: 1,
            ..Default::default()
        });
        report.absorb(CycleReport {
            accrued: 1,
            compensatory_granted: 2,
            ..Default::default()
        });
        assert_eq!(report.accounts, 2);
        assert_eq!(report.accrued, 2);
        assert_eq!(report.deducted, 1);
        assert_eq!(report.compensatory_granted, 2);
    }
}
