use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::shift::WorkTiming;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Coefficient {
    Workday,
    Offday,
    Holiday,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeaveCoefficient {
    NoLeave,
    FirstHalf,
    SecondHalf,
    FullLeave,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryMethod {
    Device,
    WebApp,
    Mobile,
    Import,
    Adjustment,
}

/// One user's attendance record for one date.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSheet {
    pub id: u64,
    pub user_id: u64,
    pub timesheet_for: NaiveDate,
    pub work_shift_id: Option<u64>,
    /// Snapshot of the timing in effect when the sheet was materialized.
    pub work_time: Option<WorkTiming>,
    pub expected_punch_in: Option<NaiveDateTime>,
    pub expected_punch_out: Option<NaiveDateTime>,
    pub punch_in: Option<NaiveDateTime>,
    pub punch_out: Option<NaiveDateTime>,
    pub punch_in_delta: Option<Duration>,
    pub punch_out_delta: Option<Duration>,
    pub coefficient: Coefficient,
    pub leave_coefficient: LeaveCoefficient,
    pub is_present: bool,
}

impl TimeSheet {
    /// A sheet that has not been persisted yet (`id == 0`).
    pub fn blank(user_id: u64, timesheet_for: NaiveDate, coefficient: Coefficient) -> Self {
        TimeSheet {
            id: 0,
            user_id,
            timesheet_for,
            work_shift_id: None,
            work_time: None,
            expected_punch_in: None,
            expected_punch_out: None,
            punch_in: None,
            punch_out: None,
            punch_in_delta: None,
            punch_out_delta: None,
            coefficient,
            leave_coefficient: LeaveCoefficient::NoLeave,
            is_present: false,
        }
    }

    pub fn worked(&self) -> Option<Duration> {
        match (self.punch_in, self.punch_out) {
            (Some(i), Some(o)) if o > i => Some(o - i),
            (Some(_), Some(_)) => Some(Duration::zero()),
            _ => None,
        }
    }
}

/// A raw punch recorded against a timesheet.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSheetEntry {
    pub id: u64,
    pub timesheet_id: u64,
    pub timestamp: NaiveDateTime,
    pub entry_method: EntryMethod,
    pub is_deleted: bool,
}
