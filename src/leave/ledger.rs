use chrono::{NaiveDate, NaiveDateTime};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::model::actor::Actor;
use crate::model::leave::{
    AccrualBasis, EncashmentStatus, LeaveAccount, LeaveAccountHistory, LeaveAction,
    LeaveEncashment, LeaveRequest, LeaveRule,
};

/// Balances move in half days.
pub fn is_half_step(value: f64) -> bool {
    value.is_finite() && (value * 2.0).fract() == 0.0
}

fn check_amount(amount: f64) -> AppResult<()> {
    if amount <= 0.0 || !is_half_step(amount) {
        return Err(AppError::InvalidBalance(format!(
            "{amount} is not a positive multiple of 0.5"
        )));
    }
    Ok(())
}

/// Runs one mutation and returns its paired history row.
///
/// The account is left untouched when `apply` fails or when the result
/// would break `usable_balance <= balance`.
fn mutate<F>(
    account: &mut LeaveAccount,
    action: LeaveAction,
    actor: Actor,
    remarks: String,
    now: NaiveDateTime,
    apply: F,
) -> AppResult<LeaveAccountHistory>
where
    F: FnOnce(&mut LeaveAccount, &mut LeaveAccountHistory) -> AppResult<()>,
{
    account.ensure_active()?;
    let mut draft = account.clone();
    let mut history = LeaveAccountHistory::open(account, action, actor, remarks, now);
    apply(&mut draft, &mut history)?;

    if draft.usable_balance > draft.balance {
        return Err(AppError::InvalidBalance(format!(
            "usable balance {} would exceed balance {} on leave account {}",
            draft.usable_balance, draft.balance, account.id
        )));
    }
    *account = draft;
    Ok(history.close(account))
}

/// Opens an account for `rule`. Both assignment forms start the chain at 0/0.
pub fn assign(
    user_id: u64,
    rule: &LeaveRule,
    initial: Option<f64>,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<(LeaveAccount, LeaveAccountHistory)> {
    let opening = initial.unwrap_or(0.0);
    if opening < 0.0 || !is_half_step(opening) {
        return Err(AppError::InvalidBalance(format!(
            "opening balance {opening} must be a non-negative multiple of 0.5"
        )));
    }

    let mut account = LeaveAccount {
        id: 0,
        user_id,
        rule_id: rule.id,
        balance: 0.0,
        usable_balance: 0.0,
        is_archived: false,
        last_accrued: None,
        last_renewed: None,
        last_deducted: None,
        assigned_on: now.date(),
    };
    let (action, remarks) = match initial {
        Some(b) => (LeaveAction::AssignedWithBalance, format!("Assigned {} with {b} balance", rule.name)),
        None => (LeaveAction::Assigned, format!("Assigned {}", rule.name)),
    };
    let history = mutate(&mut account, action, actor, remarks, now, |acc, _| {
        acc.balance = opening;
        acc.usable_balance = opening;
        Ok(())
    })?;
    Ok((account, history))
}

pub fn accrual_due(
    account: &LeaveAccount,
    rule: &LeaveRule,
    today: NaiveDate,
    worked_days_since_accrual: u32,
) -> bool {
    let Some(accumulation) = &rule.accumulation else {
        return false;
    };
    match accumulation.basis {
        AccrualBasis::Calendar => {
            let from = account.last_accrued.unwrap_or(account.assigned_on);
            accumulation.interval.next_after(from) <= today
        }
        AccrualBasis::WorkedDays => worked_days_since_accrual >= accumulation.interval.every,
    }
}

/// Adds the accumulation rule's balance to both balances, capped at
/// `max_balance`. Returns `None` when the cap leaves nothing to add.
pub fn accrue(
    account: &mut LeaveAccount,
    rule: &LeaveRule,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<Option<LeaveAccountHistory>> {
    let Some(accumulation) = &rule.accumulation else {
        return Ok(None);
    };
    let mut target = account.balance + accumulation.balance_added;
    if let Some(max) = rule.max_balance {
        target = target.min(max).max(account.balance);
    }
    let added = target - account.balance;
    if added <= 0.0 {
        account.last_accrued = Some(now.date());
        return Ok(None);
    }

    let remarks = format!(
        "Added {added} by the system under accrual for period {} - {}",
        account.last_accrued.unwrap_or(account.assigned_on),
        now.date()
    );
    mutate(account, LeaveAction::Added, actor, remarks, now, |acc, h| {
        acc.balance += added;
        acc.usable_balance += added;
        acc.last_accrued = Some(now.date());
        h.accrued = Some(added);
        Ok(())
    })
    .map(Some)
}

pub fn renewal_due(account: &LeaveAccount, rule: &LeaveRule, today: NaiveDate) -> bool {
    match &rule.renewal {
        Some(renewal) => {
            let from = account.last_renewed.unwrap_or(account.assigned_on);
            renewal.interval.next_after(from) <= today
        }
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Renewal {
    pub history: LeaveAccountHistory,
    pub encashment: Option<LeaveEncashment>,
}

/// Starts a new cycle: carry forward, then encash, then collapse whatever
/// usable balance is left, and grant the rule's initial balance.
pub fn renew(
    account: &mut LeaveAccount,
    rule: &LeaveRule,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<Option<Renewal>> {
    let Some(renewal) = &rule.renewal else {
        return Ok(None);
    };

    let difference = account.balance - account.usable_balance;
    let mut in_hand = account.usable_balance.max(0.0);

    let carry = in_hand.min(renewal.max_balance_forwarded.unwrap_or(0.0).max(0.0));
    in_hand -= carry;
    let encashed = in_hand.min(renewal.max_balance_encashed.unwrap_or(0.0).max(0.0));
    in_hand -= encashed;
    let collapsed = in_hand;

    if collapsed > 0.0 && !renewal.is_collapsible {
        warn!(
            account_id = account.id,
            collapsed, "Non-collapsible leave account had balance left at renewal"
        );
    }

    let mut new_usable = carry + renewal.initial_balance;
    if let Some(max) = rule.max_balance {
        new_usable = new_usable.min(max);
    }

    let mut remarks = format!("Renewed {} balance ", renewal.initial_balance);
    if carry > 0.0 {
        remarks.push_str(&format!("and carried forward {carry} balance "));
    }
    if encashed > 0.0 {
        remarks.push_str(&format!("and encashed {encashed} balance "));
    }
    if collapsed > 0.0 {
        remarks.push_str(&format!("and collapsed {collapsed} balance "));
    }
    remarks.push_str("by the system under renewal");

    let history = mutate(account, LeaveAction::Renewed, actor, remarks, now, |acc, h| {
        acc.usable_balance = new_usable;
        acc.balance = new_usable + difference;
        acc.last_renewed = Some(now.date());
        h.renewed = Some(renewal.initial_balance);
        h.carry_forward = (carry > 0.0).then_some(carry);
        h.encashed = (encashed > 0.0).then_some(encashed);
        h.deducted = (collapsed > 0.0).then_some(collapsed);
        Ok(())
    })?;

    let encashment = (encashed > 0.0).then(|| LeaveEncashment {
        id: 0,
        user_id: account.user_id,
        account_id: account.id,
        balance: encashed,
        status: EncashmentStatus::Generated,
        created_at: now,
    });

    Ok(Some(Renewal {
        history,
        encashment,
    }))
}

pub fn deduction_due(account: &LeaveAccount, rule: &LeaveRule, today: NaiveDate) -> bool {
    match &rule.deduction {
        Some(deduction) => {
            let from = account.last_deducted.unwrap_or(account.assigned_on);
            deduction.interval.next_after(from) <= today
        }
        None => false,
    }
}

/// Periodic deduction. Usable balance stops at `min_balance`; the gap
/// between balance and usable balance is kept. Nothing is recorded once
/// the floor is reached, but the deduction date still moves on.
pub fn deduct(
    account: &mut LeaveAccount,
    rule: &LeaveRule,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<Option<LeaveAccountHistory>> {
    let Some(deduction) = &rule.deduction else {
        return Ok(None);
    };
    let floor = rule.min_balance.unwrap_or(0.0).min(account.usable_balance);
    let new_usable = (account.usable_balance - deduction.balance_deducted).max(floor);
    let reduced = account.usable_balance - new_usable;
    let difference = account.balance - account.usable_balance;
    if reduced <= 0.0 {
        account.ensure_active()?;
        account.last_deducted = Some(now.date());
        return Ok(None);
    }

    let remarks = "Balance deducted by the system according to deduction rule".to_string();
    mutate(account, LeaveAction::Deducted, actor, remarks, now, |acc, h| {
        acc.usable_balance = new_usable;
        acc.balance = new_usable + difference;
        acc.last_deducted = Some(now.date());
        h.deducted = Some(reduced);
        Ok(())
    })
    .map(Some)
}

/// Debits an approved request. Compensatory leave only spends usable
/// balance; the per-day ledger carries the rest.
pub fn consume_for_request(
    account: &mut LeaveAccount,
    rule: &LeaveRule,
    request: &LeaveRequest,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<LeaveAccountHistory> {
    let amount = request.balance;
    check_amount(amount)?;
    if account.usable_balance - amount < 0.0 {
        return Err(AppError::InsufficientBalance {
            account_id: account.id,
            requested: amount,
            usable: account.usable_balance,
        });
    }
    let compensatory = rule.is_compensatory();
    let remarks = format!("Deducted {amount} for leave request #{}", request.id);
    mutate(account, LeaveAction::Deducted, actor, remarks, now, |acc, h| {
        acc.usable_balance -= amount;
        if !compensatory {
            acc.balance -= amount;
        }
        h.deducted = Some(amount);
        Ok(())
    })
}

/// Reverses [`consume_for_request`] when an approved request is cancelled.
pub fn refund_for_request(
    account: &mut LeaveAccount,
    rule: &LeaveRule,
    request: &LeaveRequest,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<LeaveAccountHistory> {
    let amount = request.balance;
    check_amount(amount)?;
    let compensatory = rule.is_compensatory();
    let remarks = format!("Added {amount} back for cancelled leave request #{}", request.id);
    mutate(account, LeaveAction::Added, actor, remarks, now, |acc, h| {
        acc.usable_balance += amount;
        if !compensatory {
            acc.balance += amount;
        }
        h.accrued = Some(amount);
        Ok(())
    })
}

/// Grant that raises both balances, such as a compensatory day.
pub fn credit(
    account: &mut LeaveAccount,
    amount: f64,
    remarks: String,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<LeaveAccountHistory> {
    check_amount(amount)?;
    mutate(account, LeaveAction::Added, actor, remarks, now, |acc, h| {
        acc.balance += amount;
        acc.usable_balance += amount;
        h.accrued = Some(amount);
        Ok(())
    })
}

/// Removes balance that was never spent, lowering both balances.
pub fn collapse(
    account: &mut LeaveAccount,
    amount: f64,
    remarks: String,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<LeaveAccountHistory> {
    check_amount(amount)?;
    if account.usable_balance - amount < 0.0 {
        return Err(AppError::InsufficientBalance {
            account_id: account.id,
            requested: amount,
            usable: account.usable_balance,
        });
    }
    mutate(account, LeaveAction::Deducted, actor, remarks, now, |acc, h| {
        acc.balance -= amount;
        acc.usable_balance -= amount;
        h.deducted = Some(amount);
        Ok(())
    })
}

/// Administrative correction. Only a person can make one, and it must say why.
pub fn manual_edit(
    account: &mut LeaveAccount,
    balance: f64,
    usable_balance: f64,
    remarks: &str,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<LeaveAccountHistory> {
    if actor == Actor::System {
        return Err(AppError::InvalidTransition(
            "manual balance edits need a human actor".to_string(),
        ));
    }
    if remarks.trim().is_empty() {
        return Err(AppError::InvalidBalance("remarks are required".to_string()));
    }
    for value in [balance, usable_balance] {
        if value < 0.0 || !is_half_step(value) {
            return Err(AppError::InvalidBalance(format!(
                "{value} must be a non-negative multiple of 0.5"
            )));
        }
    }
    mutate(account, LeaveAction::Updated, actor, remarks.trim().to_string(), now, |acc, _| {
        acc.balance = balance;
        acc.usable_balance = usable_balance;
        Ok(())
    })
}

/// Closes the account. History is kept; further mutations are rejected.
pub fn archive(
    account: &mut LeaveAccount,
    actor: Actor,
    remarks: &str,
    now: NaiveDateTime,
) -> AppResult<LeaveAccountHistory> {
    mutate(account, LeaveAction::Removed, actor, remarks.to_string(), now, |acc, _| {
        acc.is_archived = true;
        Ok(())
    })
}

/// First history row that does not continue from its predecessor.
#[derive(Debug, Clone, PartialEq, serde::Serialize, utoipa::ToSchema)]
pub struct ChainBreak {
    pub position: usize,
    pub row_id: u64,
    pub expected_balance: f64,
    pub expected_usable_balance: f64,
    pub found_balance: f64,
    pub found_usable_balance: f64,
}

/// Walks one account's history in creation order and reports the first
/// link where `previous_*` differs from the prior row's `new_*`.
pub fn verify_chain(history: &[LeaveAccountHistory]) -> Option<ChainBreak> {
    history.windows(2).enumerate().find_map(|(i, pair)| {
        let (prev, next) = (&pair[0], &pair[1]);
        let linked = prev.new_balance == next.previous_balance
            && prev.new_usable_balance == next.previous_usable_balance;
        (!linked).then(|| ChainBreak {
            position: i + 1,
            row_id: next.id,
            expected_balance: prev.new_balance,
            expected_usable_balance: prev.new_usable_balance,
            found_balance: next.previous_balance,
            found_usable_balance: next.previous_usable_balance,
        })
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::model::leave::{
        AccumulationRule, DeductionRule, LeaveCategory, RenewalRule, RuleInterval,
    };

    pub fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 30, 0)
            .unwrap()
    }

    pub fn annual_rule() -> LeaveRule {
        LeaveRule {
            id: 1,
            organization_id: 1,
            name: "Annual".into(),
            category: LeaveCategory::General,
            max_balance: Some(20.0),
            min_balance: None,
            accumulation: Some(AccumulationRule {
                balance_added: 1.5,
                interval: RuleInterval::months(1),
                basis: AccrualBasis::Calendar,
            }),
            renewal: Some(RenewalRule {
                initial_balance: 12.0,
                interval: RuleInterval::years(1),
                max_balance_forwarded: Some(3.0),
                max_balance_encashed: Some(2.0),
                is_collapsible: true,
            }),
            deduction: Some(DeductionRule {
                balance_deducted: 2.0,
                interval: RuleInterval::months(3),
            }),
            compensatory: Vec::new(),
            collapsible: None,
        }
    }

    pub fn account(balance: f64, usable: f64) -> LeaveAccount {
        LeaveAccount {
            id: 5,
            user_id: 7,
            rule_id: 1,
            balance,
            usable_balance: usable,
            is_archived: false,
            last_accrued: None,
            last_renewed: None,
            last_deducted: None,
            assigned_on: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        }
    }

    pub fn request(id: u64, balance: f64) -> LeaveRequest {
        use crate::model::leave::{LeaveRequestStatus, PartOfDay};
        let date = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        LeaveRequest {
            id,
            user_id: 7,
            leave_account_id: 5,
            start: date,
            end: date,
            part_of_day: PartOfDay::Full,
            balance,
            status: LeaveRequestStatus::Approved,
            details: String::new(),
            acted_by: None,
            acted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::model::leave::LeaveCategory;

    fn assert_at_rest(account: &LeaveAccount) {
        assert!(account.usable_balance <= account.balance);
    }

    #[test]
    fn assignment_starts_chain_at_zero() {
        let (account, history) = assign(7, &annual_rule(), Some(4.5), Actor::Human(1), now()).unwrap();
        assert_eq!(history.action, LeaveAction::AssignedWithBalance);
        assert_eq!((history.previous_balance, history.previous_usable_balance), (0.0, 0.0));
        assert_eq!((history.new_balance, history.new_usable_balance), (4.5, 4.5));
        assert_eq!(account.balance, 4.5);

        let (_, plain) = assign(7, &annual_rule(), None, Actor::System, now()).unwrap();
        assert_eq!(plain.action, LeaveAction::Assigned);
        assert!(assign(7, &annual_rule(), Some(1.25), Actor::System, now()).is_err());
    }

    #[test]
    fn accrual_respects_max_and_keeps_gap() {
        let rule = annual_rule();
        let mut acc = account(19.0, 18.0);
        let h = accrue(&mut acc, &rule, Actor::System, now()).unwrap().unwrap();
        assert_eq!(h.accrued, Some(1.0));
        assert_eq!((acc.balance, acc.usable_balance), (20.0, 19.0));
        assert_at_rest(&acc);

        assert_eq!(accrue(&mut acc, &rule, Actor::System, now()).unwrap(), None);
    }

    #[test]
    fn calendar_accrual_due_after_interval() {
        let rule = annual_rule();
        let mut acc = account(0.0, 0.0);
        acc.last_accrued = NaiveDate::from_ymd_opt(2024, 1, 15);
        assert!(!accrual_due(&acc, &rule, NaiveDate::from_ymd_opt(2024, 2, 14).unwrap(), 0));
        assert!(accrual_due(&acc, &rule, NaiveDate::from_ymd_opt(2024, 2, 15).unwrap(), 0));
    }

    #[test]
    fn worked_days_accrual_counts_attendance() {
        let mut rule = annual_rule();
        if let Some(acc_rule) = rule.accumulation.as_mut() {
            acc_rule.basis = AccrualBasis::WorkedDays;
            acc_rule.interval = crate::model::leave::RuleInterval::days(20);
        }
        let acc = account(0.0, 0.0);
        let today = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert!(!accrual_due(&acc, &rule, today, 19));
        assert!(accrual_due(&acc, &rule, today, 20));
    }

    #[test]
    fn renewal_carries_encashes_then_collapses() {
        let rule = annual_rule();
        let mut acc = account(10.0, 9.0);
        let renewal = renew(&mut acc, &rule, Actor::System, now()).unwrap().unwrap();
        let h = &renewal.history;

        assert_eq!(h.action, LeaveAction::Renewed);
        assert_eq!(h.carry_forward, Some(3.0));
        assert_eq!(h.encashed, Some(2.0));
        assert_eq!(h.deducted, Some(4.0));
        assert_eq!(h.renewed, Some(12.0));
        assert_eq!((h.previous_balance, h.previous_usable_balance), (10.0, 9.0));
        assert_eq!((acc.usable_balance, acc.balance), (15.0, 16.0));
        assert_at_rest(&acc);

        let encashment = renewal.encashment.unwrap();
        assert_eq!(encashment.balance, 2.0);
        assert_eq!(encashment.status, EncashmentStatus::Generated);
    }

    #[test]
    fn renewal_without_leftover_has_no_encashment() {
        let rule = annual_rule();
        let mut acc = account(1.0, 1.0);
        let renewal = renew(&mut acc, &rule, Actor::System, now()).unwrap().unwrap();
        assert_eq!(renewal.encashment, None);
        assert_eq!(renewal.history.carry_forward, Some(1.0));
        assert_eq!(renewal.history.deducted, None);
        assert_eq!(acc.usable_balance, 13.0);
    }

    #[test]
    fn deduction_stops_at_min_balance() {
        let mut rule = annual_rule();
        rule.min_balance = Some(1.0);
        let mut acc = account(3.0, 2.5);
        let h = deduct(&mut acc, &rule, Actor::System, now()).unwrap().unwrap();
        assert_eq!(h.deducted, Some(1.5));
        assert_eq!((acc.balance, acc.usable_balance), (1.5, 1.0));
    }

    #[test]
    fn deduction_at_floor_only_moves_the_date() {
        let mut rule = annual_rule();
        rule.min_balance = Some(1.0);
        let mut acc = account(3.0, 1.0);
        assert_eq!(deduct(&mut acc, &rule, Actor::System, now()).unwrap(), None);
        assert_eq!((acc.balance, acc.usable_balance), (3.0, 1.0));
        assert_eq!(acc.last_deducted, Some(now().date()));
        assert!(!deduction_due(&acc, &rule, now().date()));
    }

    #[test]
    fn consumption_cannot_overdraw() {
        let rule = annual_rule();
        let mut acc = account(2.0, 1.5);
        let err = consume_for_request(&mut acc, &rule, &request(1, 2.0), Actor::Human(3), now()).unwrap_err();
        assert!(matches!(err, AppError::InsufficientBalance { account_id: 5, .. }));
        assert_eq!((acc.balance, acc.usable_balance), (2.0, 1.5));

        let h = consume_for_request(&mut acc, &rule, &request(2, 1.5), Actor::Human(3), now()).unwrap();
        assert_eq!((h.new_balance, h.new_usable_balance), (0.5, 0.0));
    }

    #[test]
    fn compensatory_consumption_keeps_balance() {
        let mut rule = annual_rule();
        rule.category = LeaveCategory::Compensatory;
        let mut acc = account(2.0, 2.0);
        consume_for_request(&mut acc, &rule, &request(1, 1.5), Actor::Human(3), now()).unwrap();
        assert_eq!((acc.balance, acc.usable_balance), (2.0, 0.5));
        refund_for_request(&mut acc, &rule, &request(1, 1.5), Actor::Human(3), now()).unwrap();
        assert_eq!((acc.balance, acc.usable_balance), (2.0, 2.0));
    }

    #[test]
    fn manual_edit_rules() {
        let mut acc = account(5.0, 5.0);
        assert!(manual_edit(&mut acc, 6.0, 6.0, "", Actor::Human(1), now()).is_err());
        assert!(manual_edit(&mut acc, 6.0, 6.0, "fix", Actor::System, now()).is_err());
        assert!(manual_edit(&mut acc, 4.0, 4.5, "fix", Actor::Human(1), now()).is_err());
        assert!(manual_edit(&mut acc, 4.2, 4.0, "fix", Actor::Human(1), now()).is_err());
        assert_eq!((acc.balance, acc.usable_balance), (5.0, 5.0));

        let h = manual_edit(&mut acc, 7.0, 6.5, "opening correction", Actor::Human(1), now()).unwrap();
        assert_eq!(h.action, LeaveAction::Updated);
        assert_eq!(h.actor, Actor::Human(1));
        assert_eq!(h.remarks, "opening correction");
    }

    #[test]
    fn archived_account_is_frozen() {
        let mut acc = account(3.0, 3.0);
        let h = archive(&mut acc, Actor::System, "employment ended", now()).unwrap();
        assert_eq!(h.action, LeaveAction::Removed);
        assert_eq!((h.previous_balance, h.new_balance), (3.0, 3.0));
        assert!(acc.is_archived);

        let err = accrue(&mut acc, &annual_rule(), Actor::System, now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[test]
    fn full_cycle_keeps_chain_intact() {
        let rule = annual_rule();
        let (mut acc, opening) = assign(7, &rule, Some(2.0), Actor::Human(1), now()).unwrap();
        let mut history = vec![opening];
        history.extend(accrue(&mut acc, &rule, Actor::System, now()).unwrap());
        history.push(consume_for_request(&mut acc, &rule, &request(1, 1.0), Actor::Human(2), now()).unwrap());
        history.extend(deduct(&mut acc, &rule, Actor::System, now()).unwrap());
        history.push(refund_for_request(&mut acc, &rule, &request(1, 1.0), Actor::Human(2), now()).unwrap());
        history.push(renew(&mut acc, &rule, Actor::System, now()).unwrap().unwrap().history);
        history.push(manual_edit(&mut acc, 9.0, 8.0, "audit", Actor::Human(1), now()).unwrap());
        history.push(archive(&mut acc, Actor::System, "closed", now()).unwrap());

        assert_eq!(verify_chain(&history), None);
        let last = history.last().unwrap();
        assert_eq!((last.new_balance, last.new_usable_balance), (acc.balance, acc.usable_balance));
        assert_at_rest(&acc);
    }

    #[test]
    fn drift_is_reported_at_first_break() {
        let rule = annual_rule();
        let (mut acc, opening) = assign(7, &rule, Some(2.0), Actor::Human(1), now()).unwrap();
        let mut history = vec![opening];
        history.extend(accrue(&mut acc, &rule, Actor::System, now()).unwrap());
        let mut drifted = consume_for_request(&mut acc, &rule, &request(1, 1.0), Actor::Human(2), now()).unwrap();
        drifted.id = 42;
        drifted.previous_balance = 10.0;
        history.push(drifted);

        let brk = verify_chain(&history).unwrap();
        assert_eq!(brk.position, 2);
        assert_eq!(brk.row_id, 42);
        assert_eq!(brk.expected_balance, 3.5);
        assert_eq!(brk.found_balance, 10.0);
    }
}
