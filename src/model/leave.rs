use chrono::{Duration, Months, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::actor::Actor;
use crate::error::{AppError, AppResult};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeaveCategory {
    General,
    Compensatory,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntervalUnit {
    Days,
    Months,
    Years,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RuleInterval {
    pub every: u32,
    pub unit: IntervalUnit,
}

impl RuleInterval {
    pub fn days(every: u32) -> Self {
        RuleInterval {
            every,
            unit: IntervalUnit::Days,
        }
    }

    pub fn months(every: u32) -> Self {
        RuleInterval {
            every,
            unit: IntervalUnit::Months,
        }
    }

    pub fn years(every: u32) -> Self {
        RuleInterval {
            every,
            unit: IntervalUnit::Years,
        }
    }

    /// First date on which the next cycle is due. Month arithmetic clamps to
    /// the last day of a shorter month.
    pub fn next_after(&self, from: NaiveDate) -> NaiveDate {
        let next = match self.unit {
            IntervalUnit::Days => from.checked_add_signed(Duration::days(i64::from(self.every))),
            IntervalUnit::Months => from.checked_add_months(Months::new(self.every)),
            IntervalUnit::Years => from.checked_add_months(Months::new(self.every.saturating_mul(12))),
        };
        next.unwrap_or(NaiveDate::MAX)
    }

    /// The date `self` before `until`, used for collapse cut-offs.
    pub fn before(&self, until: NaiveDate) -> NaiveDate {
        let prev = match self.unit {
            IntervalUnit::Days => until.checked_sub_signed(Duration::days(i64::from(self.every))),
            IntervalUnit::Months => until.checked_sub_months(Months::new(self.every)),
            IntervalUnit::Years => until.checked_sub_months(Months::new(self.every.saturating_mul(12))),
        };
        prev.unwrap_or(NaiveDate::MIN)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccrualBasis {
    Calendar,
    /// `interval.every` counts days actually worked.
    WorkedDays,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccumulationRule {
    pub balance_added: f64,
    pub interval: RuleInterval,
    pub basis: AccrualBasis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenewalRule {
    pub initial_balance: f64,
    pub interval: RuleInterval,
    pub max_balance_forwarded: Option<f64>,
    pub max_balance_encashed: Option<f64>,
    pub is_collapsible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeductionRule {
    pub balance_deducted: f64,
    pub interval: RuleInterval,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CompensatoryRule {
    pub id: u64,
    pub hours_in_off_day: f64,
    pub balance_to_grant: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollapsibleRule {
    pub collapse_after: RuleInterval,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveRule {
    pub id: u64,
    pub organization_id: u64,
    pub name: String,
    pub category: LeaveCategory,
    pub max_balance: Option<f64>,
    pub min_balance: Option<f64>,
    pub accumulation: Option<AccumulationRule>,
    pub renewal: Option<RenewalRule>,
    pub deduction: Option<DeductionRule>,
    pub compensatory: Vec<CompensatoryRule>,
    pub collapsible: Option<CollapsibleRule>,
}

impl LeaveRule {
    pub fn is_compensatory(&self) -> bool {
        self.category == LeaveCategory::Compensatory
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow, ToSchema)]
pub struct LeaveAccount {
    pub id: u64,
    pub user_id: u64,
    pub rule_id: u64,
    pub balance: f64,
    pub usable_balance: f64,
    pub is_archived: bool,
    pub last_accrued: Option<NaiveDate>,
    pub last_renewed: Option<NaiveDate>,
    pub last_deducted: Option<NaiveDate>,
    pub assigned_on: NaiveDate,
}

impl LeaveAccount {
    pub fn ensure_active(&self) -> AppResult<()> {
        if self.is_archived {
            return Err(AppError::InvalidTransition(format!(
                "leave account {} is archived",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeaveAction {
    Added,
    Deducted,
    Renewed,
    Updated,
    Removed,
    Assigned,
    AssignedWithBalance,
}

/// Append-only ledger row. `new_*` of one row equals `previous_*` of the next.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaveAccountHistory {
    pub id: u64,
    pub account_id: u64,
    pub user_id: u64,
    pub action: LeaveAction,
    pub previous_balance: f64,
    pub previous_usable_balance: f64,
    pub new_balance: f64,
    pub new_usable_balance: f64,
    pub accrued: Option<f64>,
    pub renewed: Option<f64>,
    pub carry_forward: Option<f64>,
    pub encashed: Option<f64>,
    pub deducted: Option<f64>,
    pub remarks: String,
    pub actor: Actor,
    pub created_at: NaiveDateTime,
}

impl LeaveAccountHistory {
    /// Opens a row against the account's current balances; the caller
    /// mutates the account and then calls [`close`](Self::close).
    pub fn open(
        account: &LeaveAccount,
        action: LeaveAction,
        actor: Actor,
        remarks: impl Into<String>,
        at: NaiveDateTime,
    ) -> Self {
        LeaveAccountHistory {
            id: 0,
            account_id: account.id,
            user_id: account.user_id,
            action,
            previous_balance: account.balance,
            previous_usable_balance: account.usable_balance,
            new_balance: account.balance,
            new_usable_balance: account.usable_balance,
            accrued: None,
            renewed: None,
            carry_forward: None,
            encashed: None,
            deducted: None,
            remarks: remarks.into(),
            actor,
            created_at: at,
        }
    }

    pub fn close(mut self, account: &LeaveAccount) -> Self {
        self.new_balance = account.balance;
        self.new_usable_balance = account.usable_balance;
        self
    }

    pub fn balance_changed(&self) -> bool {
        self.previous_balance != self.new_balance
    }
}

/// One worked off-day's compensatory grant.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow, ToSchema)]
pub struct CompensatoryLeaveAccount {
    pub id: u64,
    pub leave_account_id: u64,
    pub timesheet_id: u64,
    pub leave_for: NaiveDate,
    pub balance_granted: f64,
    pub balance_consumed: f64,
}

impl CompensatoryLeaveAccount {
    pub fn remaining(&self) -> f64 {
        self.balance_granted - self.balance_consumed
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EncashmentStatus {
    Generated,
    Approved,
    Denied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveEncashment {
    pub id: u64,
    pub user_id: u64,
    pub account_id: u64,
    pub balance: f64,
    pub status: EncashmentStatus,
    pub created_at: NaiveDateTime,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PartOfDay {
    Full,
    First,
    Second,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeaveRequestStatus {
    Requested,
    Approved,
    Denied,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveRequest {
    pub id: u64,
    pub user_id: u64,
    pub leave_account_id: u64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub part_of_day: PartOfDay,
    pub balance: f64,
    pub status: LeaveRequestStatus,
    pub details: String,
    pub acted_by: Option<Actor>,
    pub acted_at: Option<NaiveDateTime>,
}

impl LeaveRequest {
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn transition(
        &mut self,
        to: LeaveRequestStatus,
        actor: Actor,
        at: NaiveDateTime,
    ) -> AppResult<()> {
        use LeaveRequestStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Requested, Approved) | (Requested, Denied) | (Requested, Cancelled) | (Approved, Cancelled)
        );
        if !allowed {
            return Err(AppError::InvalidTransition(format!(
                "leave request {} cannot move from {} to {}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        self.acted_by = Some(actor);
        self.acted_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn month_interval_clamps_to_month_end() {
        assert_eq!(RuleInterval::months(1).next_after(d(2024, 1, 31)), d(2024, 2, 29));
        assert_eq!(RuleInterval::years(1).next_after(d(2024, 2, 29)), d(2025, 2, 28));
        assert_eq!(RuleInterval::days(10).next_after(d(2024, 1, 25)), d(2024, 2, 4));
        assert_eq!(RuleInterval::days(30).before(d(2024, 3, 1)), d(2024, 1, 31));
    }

    #[test]
    fn approved_request_can_only_be_cancelled() {
        let at = d(2024, 4, 1).and_hms_opt(9, 0, 0).unwrap();
        let mut req = LeaveRequest {
            id: 1,
            user_id: 2,
            leave_account_id: 3,
            start: d(2024, 4, 2),
            end: d(2024, 4, 4),
            part_of_day: PartOfDay::Full,
            balance: 3.0,
            status: LeaveRequestStatus::Requested,
            details: String::new(),
            acted_by: None,
            acted_at: None,
        };
        assert_eq!(req.dates().count(), 3);
        req.transition(LeaveRequestStatus::Approved, Actor::Human(9), at).unwrap();
        assert!(req.transition(LeaveRequestStatus::Denied, Actor::Human(9), at).is_err());
        req.transition(LeaveRequestStatus::Cancelled, Actor::Human(2), at).unwrap();
        assert!(req.transition(LeaveRequestStatus::Approved, Actor::Human(9), at).is_err());
    }
}
