use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::attendance::recalibration::{OvertimeWrite, Trigger};
use crate::model::actor::Actor;
use crate::model::leave::{LeaveAccountHistory, LeaveAction, LeaveRequest, LeaveRequestStatus};

/// Something a user should hear about once the transaction that caused it
/// has committed. Delivery channels subscribe to the `notification` target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    LeaveStatusChanged {
        request_id: u64,
        user_id: u64,
        status: LeaveRequestStatus,
        actor: Actor,
    },
    BalanceChanged {
        account_id: u64,
        user_id: u64,
        action: LeaveAction,
        previous_balance: f64,
        new_balance: f64,
        previous_usable_balance: f64,
        new_usable_balance: f64,
        remarks: String,
    },
    OvertimeRecalibrated {
        timesheet_id: u64,
        user_id: u64,
        date: NaiveDate,
        change: &'static str,
        trigger: String,
    },
}

impl Notification {
    pub fn leave_status(request: &LeaveRequest, actor: Actor) -> Self {
        Notification::LeaveStatusChanged {
            request_id: request.id,
            user_id: request.user_id,
            status: request.status,
            actor,
        }
    }

    /// A balance notification for a ledger row. Added/Deducted rows that only
    /// moved the usable balance stay quiet.
    pub fn for_history(row: &LeaveAccountHistory) -> Option<Self> {
        let quiet = matches!(row.action, LeaveAction::Added | LeaveAction::Deducted)
            && !row.balance_changed();
        if quiet {
            return None;
        }
        Some(Notification::BalanceChanged {
            account_id: row.account_id,
            user_id: row.user_id,
            action: row.action,
            previous_balance: row.previous_balance,
            new_balance: row.new_balance,
            previous_usable_balance: row.previous_usable_balance,
            new_usable_balance: row.new_usable_balance,
            remarks: row.remarks.clone(),
        })
    }

    pub fn for_overtime(
        timesheet_id: u64,
        user_id: u64,
        date: NaiveDate,
        write: &OvertimeWrite,
        trigger: Trigger,
    ) -> Option<Self> {
        let change = match write {
            OvertimeWrite::Create(_) => "created",
            OvertimeWrite::Update { .. } => "updated",
            OvertimeWrite::Delete(_) => "deleted",
            OvertimeWrite::Unchanged | OvertimeWrite::Locked(_) => return None,
        };
        Some(Notification::OvertimeRecalibrated {
            timesheet_id,
            user_id,
            date,
            change,
            trigger: trigger.to_string(),
        })
    }

    pub fn user_id(&self) -> u64 {
        match self {
            Notification::LeaveStatusChanged { user_id, .. }
            | Notification::BalanceChanged { user_id, .. }
            | Notification::OvertimeRecalibrated { user_id, .. } => *user_id,
        }
    }

    pub fn emit(&self) {
        let payload = serde_json::to_string(self).unwrap_or_default();
        info!(target: "notification", user_id = self.user_id(), %payload, "notify");
    }
}

/// Sends everything collected by a committed operation.
pub fn dispatch(notifications: Vec<Notification>) {
    for n in &notifications {
        n.emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leave::ledger::fixtures::{account, now};
    use crate::model::leave::LeaveAccountHistory;

    fn row(action: LeaveAction, balance: (f64, f64), usable: (f64, f64)) -> LeaveAccountHistory {
        let acc = account(balance.0, usable.0);
        let mut h = LeaveAccountHistory::open(&acc, action, Actor::System, "x", now());
        h.new_balance = balance.1;
        h.new_usable_balance = usable.1;
        h
    }

    #[test]
    fn usable_only_movement_is_quiet() {
        let compensatory_debit = row(LeaveAction::Deducted, (4.0, 4.0), (4.0, 3.0));
        assert!(Notification::for_history(&compensatory_debit).is_none());

        let general_debit = row(LeaveAction::Deducted, (4.0, 3.0), (4.0, 3.0));
        assert!(Notification::for_history(&general_debit).is_some());

        let edit = row(LeaveAction::Updated, (4.0, 4.0), (4.0, 3.0));
        assert!(Notification::for_history(&edit).is_some());
    }

    #[test]
    fn serializes_with_kind_tag() {
        let n = Notification::BalanceChanged {
            account_id: 5,
            user_id: 7,
            action: LeaveAction::Renewed,
            previous_balance: 1.0,
            new_balance: 12.0,
            previous_usable_balance: 1.0,
            new_usable_balance: 12.0,
            remarks: "Renewed".into(),
        };
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["kind"], "balance_changed");
        assert_eq!(value["user_id"], 7);
        assert_eq!(n.user_id(), 7);
    }

    #[test]
    fn unchanged_overtime_is_not_announced() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert!(Notification::for_overtime(1, 7, date, &OvertimeWrite::Unchanged, Trigger::Batch).is_none());
    }
}
