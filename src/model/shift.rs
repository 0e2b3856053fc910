use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One working window of a workday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct WorkTiming {
    pub id: u64,
    #[schema(value_type = String, format = "time", example = "09:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, format = "time", example = "18:00:00")]
    pub end_time: NaiveTime,
    /// The window ends on the following calendar day (night shift).
    pub extends: bool,
    pub working_minutes: u32,
    #[schema(value_type = Option<String>, format = "time")]
    pub break_start: Option<NaiveTime>,
    #[schema(value_type = Option<String>, format = "time")]
    pub break_end: Option<NaiveTime>,
}

impl WorkTiming {
    /// Expected punch-in/out for the window on `date`.
    pub fn window_on(&self, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        let start = date.and_time(self.start_time);
        let end_date = if self.extends {
            date.succ_opt().unwrap_or(date)
        } else {
            date
        };
        (start, end_date.and_time(self.end_time))
    }

    pub fn half_day_minutes(&self) -> i64 {
        i64::from(self.working_minutes) / 2
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkDay {
    pub id: u64,
    pub day: Weekday,
    pub applicable_from: NaiveDate,
    pub applicable_to: Option<NaiveDate>,
    pub timings: Vec<WorkTiming>,
}

impl WorkDay {
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.day == date.weekday()
            && self.applicable_from <= date
            && self.applicable_to.map_or(true, |to| date <= to)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkShift {
    pub id: u64,
    pub name: String,
    pub work_days: Vec<WorkDay>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct IndividualUserShift {
    pub id: u64,
    pub user_id: u64,
    pub shift_id: u64,
    pub applicable_from: NaiveDate,
    pub applicable_to: Option<NaiveDate>,
}

/// Organizational facts about a user needed for holiday applicability.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserContext {
    pub user_id: u64,
    pub organization_id: u64,
    pub branch_id: Option<u64>,
    pub division_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Holiday {
    pub id: u64,
    pub organization_id: u64,
    pub date: NaiveDate,
    pub name: String,
    pub branch_id: Option<u64>,
    pub division_id: Option<u64>,
}

impl Holiday {
    pub fn applies_to(&self, user: &UserContext, date: NaiveDate) -> bool {
        self.date == date
            && self.organization_id == user.organization_id
            && self.branch_id.map_or(true, |b| user.branch_id == Some(b))
            && self.division_id.map_or(true, |d| user.division_id == Some(d))
    }
}

/// Weekdays are persisted as ISO numbers (Monday = 1).
pub fn weekday_from_number(n: u8) -> Option<Weekday> {
    match n {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}
