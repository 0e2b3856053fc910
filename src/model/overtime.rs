use chrono::{Duration, NaiveDateTime};
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
pub enum SlotBehavior {
    Up,
    Down,
    /// Keep the raw duration.
    Const,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OffdayOvertimePolicy {
    GenerateBoth,
    NoOvertime,
    GenerateAfterDeduction,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApplicableAfter {
    Both,
    Either,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeductAfterFor {
    Neither,
    Both,
    PunchInOnly,
    PunchOutOnly,
}

impl DeductAfterFor {
    pub fn punch_in(&self) -> bool {
        matches!(self, DeductAfterFor::Both | DeductAfterFor::PunchInOnly)
    }

    pub fn punch_out(&self) -> bool {
        matches!(self, DeductAfterFor::Both | DeductAfterFor::PunchOutOnly)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OvertimeCalculation {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OvertimeSetting {
    pub id: u64,
    pub organization_id: u64,
    pub name: String,
    pub enable_overtime: bool,
    pub overtime_calculation: OvertimeCalculation,
    /// Minutes of early-in required before punch-in overtime qualifies.
    pub applicable_before: u32,
    /// Minutes of late-out required before punch-out overtime qualifies.
    pub applicable_after: u32,
    pub overtime_applicable_only_after: ApplicableAfter,
    pub deduct_overtime_after_for: DeductAfterFor,
    pub flat_reject_value: u32,
    pub off_day_overtime: bool,
    pub paid_holiday_affect_overtime: bool,
    pub leave_affect_overtime: bool,
    pub overtime_after_offday: OffdayOvertimePolicy,
    pub overtime_after_holiday: OffdayOvertimePolicy,
    pub calculate_overtime_in_slots: bool,
    pub slot_duration_in_minutes: Option<u32>,
    pub slot_behavior_for_remainder: SlotBehavior,
    pub daily_overtime_limit: Option<u32>,
    pub off_day_overtime_limit: Option<u32>,
    pub holiday_overtime_limit: Option<u32>,
    pub leave_overtime_limit: Option<u32>,
}

impl Default for OvertimeSetting {
    fn default() -> Self {
        OvertimeSetting {
            id: 0,
            organization_id: 0,
            name: "Default".to_string(),
            enable_overtime: true,
            overtime_calculation: OvertimeCalculation::Daily,
            applicable_before: 0,
            applicable_after: 0,
            overtime_applicable_only_after: ApplicableAfter::Both,
            deduct_overtime_after_for: DeductAfterFor::Neither,
            flat_reject_value: 0,
            off_day_overtime: false,
            paid_holiday_affect_overtime: true,
            leave_affect_overtime: true,
            overtime_after_offday: OffdayOvertimePolicy::GenerateBoth,
            overtime_after_holiday: OffdayOvertimePolicy::GenerateBoth,
            calculate_overtime_in_slots: false,
            slot_duration_in_minutes: None,
            slot_behavior_for_remainder: SlotBehavior::Down,
            daily_overtime_limit: None,
            off_day_overtime_limit: None,
            holiday_overtime_limit: None,
            leave_overtime_limit: None,
        }
    }
}

impl OvertimeSetting {
    /// Rejects settings the calculator cannot evaluate.
    pub fn validate(&self) -> AppResult<()> {
        if self.calculate_overtime_in_slots {
            match self.slot_duration_in_minutes {
                None | Some(0) => {
                    return Err(AppError::InvalidOvertimeSetting {
                        setting_id: self.id,
                        reason: "slot_duration_in_minutes must be positive when slots are enabled"
                            .to_string(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClaimStatus {
    Unclaimed,
    Requested,
    Forwarded,
    Approved,
    Declined,
    Confirmed,
}

impl ClaimStatus {
    /// Entries whose claim is in flight or settled are not rewritten.
    pub fn allows_recalibration(&self) -> bool {
        matches!(self, ClaimStatus::Unclaimed | ClaimStatus::Declined)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OvertimeDetail {
    pub punch_in_overtime: Duration,
    pub punch_out_overtime: Duration,
    pub claimed_overtime: Option<Duration>,
}

impl OvertimeDetail {
    pub fn total(&self) -> Duration {
        self.punch_in_overtime + self.punch_out_overtime
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OvertimeEntry {
    pub id: u64,
    pub user_id: u64,
    pub timesheet_id: u64,
    pub overtime_setting_id: u64,
    pub claim_status: ClaimStatus,
    pub detail: OvertimeDetail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OvertimeDetailHistory {
    pub entry_id: u64,
    pub actor: Actor,
    pub previous_punch_in_overtime: Duration,
    pub previous_punch_out_overtime: Duration,
    pub current_punch_in_overtime: Duration,
    pub current_punch_out_overtime: Duration,
    pub remarks: String,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_slot_is_a_configuration_error() {
        let setting = OvertimeSetting {
            id: 4,
            calculate_overtime_in_slots: true,
            slot_duration_in_minutes: Some(0),
            ..OvertimeSetting::default()
        };
        let err = setting.validate().unwrap_err();
        assert!(matches!(err, AppError::InvalidOvertimeSetting { setting_id: 4, .. }));
    }

    #[test]
    fn slots_disabled_ignore_duration() {
        let setting = OvertimeSetting {
            calculate_overtime_in_slots: false,
            slot_duration_in_minutes: None,
            ..OvertimeSetting::default()
        };
        assert!(setting.validate().is_ok());
    }

    #[test]
    fn only_open_claims_recalibrate() {
        assert!(ClaimStatus::Unclaimed.allows_recalibration());
        assert!(ClaimStatus::Declined.allows_recalibration());
        assert!(!ClaimStatus::Approved.allows_recalibration());
        assert!(!ClaimStatus::Requested.allows_recalibration());
    }
}
