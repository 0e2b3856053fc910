use chrono::NaiveDateTime;
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
pub enum AdjustmentStatus {
    Pending,
    Approved,
    Declined,
}

/// Which side of the day an adjustment replaces.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdjustmentCategory {
    PunchIn,
    PunchOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceAdjustment {
    pub id: u64,
    pub timesheet_id: u64,
    pub timestamp: NaiveDateTime,
    pub category: AdjustmentCategory,
    pub status: AdjustmentStatus,
    pub description: String,
    pub acted_by: Option<Actor>,
    pub acted_at: Option<NaiveDateTime>,
}

impl AttendanceAdjustment {
    pub fn approve(&mut self, actor: Actor, at: NaiveDateTime) -> AppResult<()> {
        self.act(AdjustmentStatus::Approved, actor, at)
    }

    pub fn decline(&mut self, actor: Actor, at: NaiveDateTime) -> AppResult<()> {
        self.act(AdjustmentStatus::Declined, actor, at)
    }

    // Approved and declined are terminal; corrections go through a new row.
    fn act(&mut self, to: AdjustmentStatus, actor: Actor, at: NaiveDateTime) -> AppResult<()> {
        if self.status != AdjustmentStatus::Pending {
            return Err(AppError::InvalidTransition(format!(
                "adjustment {} is already {}",
                self.id, self.status
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
    use chrono::NaiveDate;

    fn pending() -> AttendanceAdjustment {
        AttendanceAdjustment {
            id: 3,
            timesheet_id: 1,
            timestamp: NaiveDate::from_ymd_opt(2024, 5, 2)
                .unwrap()
                .and_hms_opt(19, 0, 0)
                .unwrap(),
            category: AdjustmentCategory::PunchOut,
            status: AdjustmentStatus::Pending,
            description: "forgot to punch out".into(),
            acted_by: None,
            acted_at: None,
        }
    }

    #[test]
    fn approval_is_terminal() {
        let at = NaiveDate::from_ymd_opt(2024, 5, 3)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let mut adj = pending();
        adj.approve(Actor::Human(2), at).unwrap();
        assert_eq!(adj.status, AdjustmentStatus::Approved);
        assert_eq!(adj.acted_by, Some(Actor::Human(2)));

        let err = adj.decline(Actor::Human(2), at).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert_eq!(adj.status, AdjustmentStatus::Approved);
    }

    #[test]
    fn category_round_trips_through_column_text() {
        assert_eq!(AdjustmentCategory::PunchOut.as_ref(), "punch_out");
        assert_eq!(
            "punch_in".parse::<AdjustmentCategory>().unwrap(),
            AdjustmentCategory::PunchIn
        );
    }
}
