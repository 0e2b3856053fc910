use chrono::{NaiveDate, NaiveDateTime};

use super::ledger;
use crate::attendance::overtime::qualifying_rule;
use crate::error::{AppError, AppResult};
use crate::model::actor::Actor;
use crate::model::leave::{CompensatoryLeaveAccount, LeaveAccount, LeaveAccountHistory, LeaveRule};
use crate::model::timesheet::{Coefficient, TimeSheet};

/// Amount moved on one earned day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayMove {
    pub compensatory_id: u64,
    pub amount: f64,
}

/// Spends `amount` from the oldest earned days first.
///
/// Rows are only touched when the whole amount fits.
pub fn consume(
    account_id: u64,
    rows: &mut [CompensatoryLeaveAccount],
    amount: f64,
) -> AppResult<Vec<DayMove>> {
    let remaining: f64 = rows.iter().map(|r| r.remaining()).sum();
    if amount > remaining {
        return Err(AppError::CompensatoryOverConsumption {
            account_id,
            requested: amount,
            remaining,
        });
    }

    rows.sort_by_key(|r| (r.leave_for, r.id));
    let mut left = amount;
    let mut moves = Vec::new();
    for row in rows.iter_mut() {
        if left <= 0.0 {
            break;
        }
        let consumable = row.remaining();
        if consumable <= 0.0 {
            continue;
        }
        let take = consumable.min(left);
        row.balance_consumed += take;
        left -= take;
        moves.push(DayMove {
            compensatory_id: row.id,
            amount: take,
        });
    }
    Ok(moves)
}

/// Gives `amount` back starting with the most recently earned day.
pub fn refund(
    account_id: u64,
    rows: &mut [CompensatoryLeaveAccount],
    amount: f64,
) -> AppResult<Vec<DayMove>> {
    let consumed: f64 = rows.iter().map(|r| r.balance_consumed).sum();
    if amount > consumed {
        return Err(AppError::CompensatoryOverRefund {
            account_id,
            requested: amount,
            consumed,
        });
    }

    rows.sort_by_key(|r| std::cmp::Reverse((r.leave_for, r.id)));
    let mut left = amount;
    let mut moves = Vec::new();
    for row in rows.iter_mut() {
        if left <= 0.0 {
            break;
        }
        let take = row.balance_consumed.min(left);
        if take <= 0.0 {
            continue;
        }
        row.balance_consumed -= take;
        left -= take;
        moves.push(DayMove {
            compensatory_id: row.id,
            amount: take,
        });
    }
    Ok(moves)
}

/// Grants compensatory balance for a worked off-day or holiday.
///
/// Returns `None` when the day is a workday, was not fully punched, did not
/// reach any tier, or was already granted.
pub fn grant(
    account: &mut LeaveAccount,
    rule: &LeaveRule,
    ts: &TimeSheet,
    existing: &[CompensatoryLeaveAccount],
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<Option<(CompensatoryLeaveAccount, LeaveAccountHistory)>> {
    if !matches!(ts.coefficient, Coefficient::Offday | Coefficient::Holiday) {
        return Ok(None);
    }
    if existing.iter().any(|r| r.timesheet_id == ts.id) {
        return Ok(None);
    }
    let Some(worked) = ts.worked() else {
        return Ok(None);
    };
    let Some(tier) = qualifying_rule(&rule.compensatory, worked) else {
        return Ok(None);
    };

    let amount = tier.balance_to_grant;
    let remarks = format!(
        "Added {amount} compensatory balance for working on {}",
        ts.timesheet_for
    );
    let history = ledger::credit(account, amount, remarks, actor, now)?;
    let row = CompensatoryLeaveAccount {
        id: 0,
        leave_account_id: account.id,
        timesheet_id: ts.id,
        leave_for: ts.timesheet_for,
        balance_granted: amount,
        balance_consumed: 0.0,
    };
    Ok(Some((row, history)))
}

/// Collapses the unspent part of days earned before the rule's window.
/// Each collapsed day writes its own history row.
pub fn collapse(
    account: &mut LeaveAccount,
    rule: &LeaveRule,
    rows: &mut [CompensatoryLeaveAccount],
    today: NaiveDate,
    actor: Actor,
    now: NaiveDateTime,
) -> AppResult<Vec<(DayMove, LeaveAccountHistory)>> {
    let Some(collapsible) = &rule.collapsible else {
        return Ok(Vec::new());
    };
    let cutoff = collapsible.collapse_after.before(today);

    rows.sort_by_key(|r| (r.leave_for, r.id));
    let mut collapsed = Vec::new();
    for row in rows.iter_mut().filter(|r| r.leave_for < cutoff) {
        let amount = row.remaining();
        if amount <= 0.0 {
            continue;
        }
        let remarks = format!(
            "Collapsed {amount} compensatory balance earned on {}",
            row.leave_for
        );
        let history = ledger::collapse(account, amount, remarks, actor, now)?;
        row.balance_consumed = row.balance_granted;
        collapsed.push((
            DayMove {
                compensatory_id: row.id,
                amount,
            },
            history,
        ));
    }
    Ok(collapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::materializer::fixtures::{at, user};
    use crate::attendance::materializer::materialize;
    use crate::leave::ledger::fixtures::{account, annual_rule, now};
    use crate::leave::ledger::{consume_for_request, fixtures::request, refund_for_request, verify_chain};
    use crate::model::leave::{CollapsibleRule, CompensatoryRule, LeaveCategory, RuleInterval};

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn row(id: u64, leave_for: NaiveDate, granted: f64, consumed: f64) -> CompensatoryLeaveAccount {
        CompensatoryLeaveAccount {
            id,
            leave_account_id: 5,
            timesheet_id: id + 100,
            leave_for,
            balance_granted: granted,
            balance_consumed: consumed,
        }
    }

    fn comp_rule() -> LeaveRule {
        let mut rule = annual_rule();
        rule.category = LeaveCategory::Compensatory;
        rule.accumulation = None;
        rule.renewal = None;
        rule.deduction = None;
        rule.compensatory = vec![
            CompensatoryRule {
                id: 1,
                hours_in_off_day: 4.0,
                balance_to_grant: 0.5,
            },
            CompensatoryRule {
                id: 2,
                hours_in_off_day: 8.0,
                balance_to_grant: 1.0,
            },
        ];
        rule.collapsible = Some(CollapsibleRule {
            collapse_after: RuleInterval::days(30),
        });
        rule
    }

    fn remaining(rows: &[CompensatoryLeaveAccount]) -> f64 {
        rows.iter().map(|r| r.remaining()).sum()
    }

    fn bounded(rows: &[CompensatoryLeaveAccount]) -> bool {
        rows.iter()
            .all(|r| 0.0 <= r.balance_consumed && r.balance_consumed <= r.balance_granted)
    }

    #[test]
    fn consumes_oldest_day_first() {
        // stored newest first to prove ordering is by date, not position
        let mut rows = vec![row(2, d(2, 10), 1.0, 0.0), row(1, d(2, 3), 1.0, 0.0)];
        let moves = consume(5, &mut rows, 1.5).unwrap();
        assert_eq!(
            moves,
            vec![
                DayMove { compensatory_id: 1, amount: 1.0 },
                DayMove { compensatory_id: 2, amount: 0.5 },
            ]
        );
        let first = rows.iter().find(|r| r.id == 1).unwrap();
        let second = rows.iter().find(|r| r.id == 2).unwrap();
        assert_eq!(first.balance_consumed, 1.0);
        assert_eq!(second.balance_consumed, 0.5);
        assert!(bounded(&rows));
    }

    #[test]
    fn over_consumption_touches_nothing() {
        let mut rows = vec![row(1, d(2, 3), 1.0, 0.5), row(2, d(2, 10), 0.5, 0.0)];
        let err = consume(5, &mut rows, 1.5).unwrap_err();
        assert!(matches!(err, AppError::CompensatoryOverConsumption { remaining, .. } if remaining == 1.0));
        assert_eq!(rows[0].balance_consumed, 0.5);
    }

    #[test]
    fn refunds_newest_day_first() {
        let mut rows = vec![row(1, d(2, 3), 1.0, 1.0), row(2, d(2, 10), 1.0, 0.5)];
        let moves = refund(5, &mut rows, 1.0).unwrap();
        assert_eq!(
            moves,
            vec![
                DayMove { compensatory_id: 2, amount: 0.5 },
                DayMove { compensatory_id: 1, amount: 0.5 },
            ]
        );
        assert!(bounded(&rows));
        assert!(matches!(
            refund(5, &mut rows, 1.0),
            Err(AppError::CompensatoryOverRefund { .. })
        ));
    }

    fn worked_off_day(id: u64, date: NaiveDate, hours: u32) -> TimeSheet {
        let mut ts = materialize(None, &user(), date, None, &[]);
        ts.id = id;
        ts.punch_in = Some(at(date, 9, 0));
        ts.punch_out = Some(at(date, 9 + hours, 0));
        ts
    }

    #[test]
    fn grant_picks_best_tier_once() {
        let rule = comp_rule();
        let mut acc = account(0.0, 0.0);
        let ts = worked_off_day(11, d(3, 2), 9);

        let (granted, history) = grant(&mut acc, &rule, &ts, &[], Actor::System, now())
            .unwrap()
            .unwrap();
        assert_eq!(granted.balance_granted, 1.0);
        assert_eq!(granted.leave_for, d(3, 2));
        assert_eq!(history.accrued, Some(1.0));
        assert_eq!((acc.balance, acc.usable_balance), (1.0, 1.0));

        let again = grant(&mut acc, &rule, &ts, &[granted], Actor::System, now()).unwrap();
        assert!(again.is_none());

        let short = worked_off_day(12, d(3, 3), 3);
        assert!(grant(&mut acc, &rule, &short, &[], Actor::System, now()).unwrap().is_none());
    }

    #[test]
    fn workday_earns_nothing() {
        let rule = comp_rule();
        let mut acc = account(0.0, 0.0);
        let mut ts = worked_off_day(11, d(3, 4), 9);
        ts.coefficient = Coefficient::Workday;
        assert!(grant(&mut acc, &rule, &ts, &[], Actor::System, now()).unwrap().is_none());
    }

    #[test]
    fn collapse_old_days_one_row_each() {
        let rule = comp_rule();
        let mut acc = account(2.5, 1.5);
        let mut rows = vec![
            row(1, d(1, 2), 1.0, 0.5),
            row(2, d(1, 20), 0.5, 0.0),
            row(3, d(2, 28), 0.5, 0.0),
            row(4, d(1, 5), 0.5, 0.5),
        ];
        let collapsed = collapse(&mut acc, &rule, &mut rows, d(3, 10), Actor::System, now()).unwrap();

        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].0, DayMove { compensatory_id: 1, amount: 0.5 });
        assert_eq!(collapsed[1].0, DayMove { compensatory_id: 2, amount: 0.5 });
        assert_eq!((acc.balance, acc.usable_balance), (1.5, 0.5));
        assert_eq!(remaining(&rows), acc.usable_balance);
        assert!(bounded(&rows));
        let histories: Vec<_> = collapsed.into_iter().map(|(_, h)| h).collect();
        assert_eq!(verify_chain(&histories), None);
    }

    #[test]
    fn day_ledger_tracks_usable_balance() {
        let rule = comp_rule();
        let mut acc = account(0.0, 0.0);
        let mut rows = Vec::new();
        for (id, day) in [(21, d(3, 2)), (22, d(3, 9))] {
            let ts = worked_off_day(id, day, 8);
            let (row, _) = grant(&mut acc, &rule, &ts, &rows, Actor::System, now())
                .unwrap()
                .unwrap();
            rows.push(row);
        }
        assert_eq!(remaining(&rows), acc.usable_balance);

        let req = request(1, 1.5);
        consume(acc.id, &mut rows, req.balance).unwrap();
        consume_for_request(&mut acc, &rule, &req, Actor::Human(3), now()).unwrap();
        assert_eq!(remaining(&rows), acc.usable_balance);

        refund(acc.id, &mut rows, req.balance).unwrap();
        refund_for_request(&mut acc, &rule, &req, Actor::Human(3), now()).unwrap();
        assert_eq!(remaining(&rows), acc.usable_balance);
        assert_eq!(acc.usable_balance, 2.0);
    }
}
