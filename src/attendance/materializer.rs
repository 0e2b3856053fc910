use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::resolver::ResolvedDay;
use crate::model::adjustment::{AdjustmentCategory, AdjustmentStatus, AttendanceAdjustment};
use crate::model::leave::{LeaveRequest, LeaveRequestStatus, PartOfDay};
use crate::model::shift::{Holiday, UserContext};
use crate::model::timesheet::{Coefficient, EntryMethod, LeaveCoefficient, TimeSheet, TimeSheetEntry};

pub fn coefficient_for(resolved: Option<&ResolvedDay>, is_holiday: bool) -> Coefficient {
    if is_holiday {
        return Coefficient::Holiday;
    }
    match resolved {
        Some(day) if !day.is_off_day() => Coefficient::Workday,
        _ => Coefficient::Offday,
    }
}

/// Creates the sheet for `date`, or re-derives the shift facts of an
/// existing one. Punches and the leave coefficient are preserved.
pub fn materialize(
    existing: Option<TimeSheet>,
    user: &UserContext,
    date: NaiveDate,
    resolved: Option<&ResolvedDay>,
    holidays: &[Holiday],
) -> TimeSheet {
    let is_holiday = holidays.iter().any(|h| h.applies_to(user, date));
    let coefficient = coefficient_for(resolved, is_holiday);

    let mut ts = existing.unwrap_or_else(|| TimeSheet::blank(user.user_id, date, coefficient));
    ts.coefficient = coefficient;
    ts.work_shift_id = resolved.map(|r| r.shift_id);
    ts.work_time = resolved.and_then(|r| r.timing.clone());
    apply_expected(&mut ts);
    ts
}

/// Sets actual punches from raw entries and approved adjustments.
///
/// An approved adjustment replaces its side outright; when several target
/// the same side the most recently approved is used.
pub fn fix_entries(
    ts: &mut TimeSheet,
    entries: &[TimeSheetEntry],
    adjustments: &[AttendanceAdjustment],
) {
    let mut stamps: Vec<NaiveDateTime> = entries
        .iter()
        .filter(|e| !e.is_deleted && e.timesheet_id == ts.id)
        .map(|e| e.timestamp)
        .collect();
    stamps.sort();

    let mut punch_in = stamps.first().copied();
    let mut punch_out = if stamps.len() >= 2 {
        stamps.last().copied()
    } else {
        None
    };

    if let Some(adj) = latest_approved(adjustments, ts.id, AdjustmentCategory::PunchIn) {
        punch_in = Some(adj.timestamp);
    }
    if let Some(adj) = latest_approved(adjustments, ts.id, AdjustmentCategory::PunchOut) {
        punch_out = Some(adj.timestamp);
    }

    ts.punch_in = punch_in;
    ts.punch_out = punch_out;
    ts.is_present = punch_in.is_some();
}

fn latest_approved(
    adjustments: &[AttendanceAdjustment],
    timesheet_id: u64,
    category: AdjustmentCategory,
) -> Option<&AttendanceAdjustment> {
    adjustments
        .iter()
        .filter(|a| {
            a.timesheet_id == timesheet_id
                && a.category == category
                && a.status == AdjustmentStatus::Approved
        })
        .max_by_key(|a| (a.acted_at, a.id))
}

/// Expected window from the timing snapshot, shifted by half-day leave and
/// removed by full leave. Only workdays have one.
pub fn apply_expected(ts: &mut TimeSheet) {
    let window = match (&ts.work_time, ts.coefficient) {
        (Some(timing), Coefficient::Workday) => Some((timing.window_on(ts.timesheet_for), timing.half_day_minutes())),
        _ => None,
    };

    let (expected_in, expected_out) = match (window, ts.leave_coefficient) {
        (None, _) | (_, LeaveCoefficient::FullLeave) => (None, None),
        (Some(((start, end), _)), LeaveCoefficient::NoLeave) => (Some(start), Some(end)),
        (Some(((start, end), half)), LeaveCoefficient::FirstHalf) => {
            (Some(start + Duration::minutes(half)), Some(end))
        }
        (Some(((start, end), half)), LeaveCoefficient::SecondHalf) => {
            (Some(start), Some(end - Duration::minutes(half)))
        }
    };

    ts.expected_punch_in = expected_in;
    ts.expected_punch_out = expected_out;
    recompute_deltas(ts);
}

/// `actual - expected` per side; positive punch-in delta means a late arrival.
pub fn recompute_deltas(ts: &mut TimeSheet) {
    ts.punch_in_delta = match (ts.punch_in, ts.expected_punch_in) {
        (Some(actual), Some(expected)) => Some(actual - expected),
        _ => None,
    };
    ts.punch_out_delta = match (ts.punch_out, ts.expected_punch_out) {
        (Some(actual), Some(expected)) => Some(actual - expected),
        _ => None,
    };
}

/// Full re-derivation of a sheet from its current inputs.
pub fn refresh(
    ts: &mut TimeSheet,
    entries: &[TimeSheetEntry],
    adjustments: &[AttendanceAdjustment],
) {
    fix_entries(ts, entries, adjustments);
    apply_expected(ts);
}

pub fn apply_leave_coefficient(ts: &mut TimeSheet, leave: LeaveCoefficient) {
    ts.leave_coefficient = leave;
    apply_expected(ts);
}

/// Folds the parts of day covered by approved leave into one coefficient.
pub fn combine_leave_parts<I>(parts: I) -> LeaveCoefficient
where
    I: IntoIterator<Item = PartOfDay>,
{
    let (mut first, mut second) = (false, false);
    for part in parts {
        match part {
            PartOfDay::Full => return LeaveCoefficient::FullLeave,
            PartOfDay::First => first = true,
            PartOfDay::Second => second = true,
        }
    }
    match (first, second) {
        (true, true) => LeaveCoefficient::FullLeave,
        (true, false) => LeaveCoefficient::FirstHalf,
        (false, true) => LeaveCoefficient::SecondHalf,
        (false, false) => LeaveCoefficient::NoLeave,
    }
}

/// Leave coefficient of `date` from the approved requests that cover it.
pub fn leave_on(requests: &[LeaveRequest], date: NaiveDate) -> LeaveCoefficient {
    combine_leave_parts(
        requests
            .iter()
            .filter(|r| r.status == LeaveRequestStatus::Approved && r.covers(date))
            .map(|r| r.part_of_day),
    )
}

/// Appends a punch to the sheet's entries and re-derives the sheet.
pub fn clock(
    ts: &mut TimeSheet,
    entries: &mut Vec<TimeSheetEntry>,
    adjustments: &[AttendanceAdjustment],
    timestamp: NaiveDateTime,
    entry_method: EntryMethod,
) -> TimeSheetEntry {
    let entry = TimeSheetEntry {
        id: 0,
        timesheet_id: ts.id,
        timestamp,
        entry_method,
        is_deleted: false,
    };
    entries.push(entry.clone());
    refresh(ts, entries, adjustments);
    entry
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::model::shift::WorkTiming;
    use chrono::NaiveTime;

    pub fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
        date.and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    pub fn nine_to_six() -> WorkTiming {
        WorkTiming {
            id: 1,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            extends: false,
            working_minutes: 540,
            break_start: None,
            break_end: None,
        }
    }

    pub fn user() -> UserContext {
        UserContext {
            user_id: 7,
            organization_id: 1,
            branch_id: None,
            division_id: None,
        }
    }

    pub fn workday() -> ResolvedDay {
        ResolvedDay {
            assignment_id: 1,
            shift_id: 1,
            work_day_id: Some(1),
            timing: Some(nine_to_six()),
        }
    }

    /// Persisted workday sheet 09:00-18:00 with id 1.
    pub fn workday_sheet(date: NaiveDate) -> TimeSheet {
        let mut ts = materialize(None, &user(), date, Some(&workday()), &[]);
        ts.id = 1;
        ts
    }

    pub fn entry(id: u64, ts: &TimeSheet, timestamp: NaiveDateTime) -> TimeSheetEntry {
        TimeSheetEntry {
            id,
            timesheet_id: ts.id,
            timestamp,
            entry_method: EntryMethod::Device,
            is_deleted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::model::actor::Actor;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    #[test]
    fn materialize_sets_expected_window() {
        let ts = workday_sheet(day());
        assert_eq!(ts.coefficient, Coefficient::Workday);
        assert_eq!(ts.expected_punch_in, Some(at(day(), 9, 0)));
        assert_eq!(ts.expected_punch_out, Some(at(day(), 18, 0)));
        assert!(!ts.is_present);
    }

    #[test]
    fn holiday_overrides_workday() {
        let holiday = Holiday {
            id: 1,
            organization_id: 1,
            date: day(),
            name: "Founders day".into(),
            branch_id: None,
            division_id: None,
        };
        let ts = materialize(None, &user(), day(), Some(&workday()), &[holiday]);
        assert_eq!(ts.coefficient, Coefficient::Holiday);
        assert_eq!(ts.expected_punch_in, None);
    }

    #[test]
    fn rematerialize_keeps_punches_and_leave() {
        let mut ts = workday_sheet(day());
        ts.punch_in = Some(at(day(), 8, 30));
        ts.leave_coefficient = LeaveCoefficient::FirstHalf;

        let ts = materialize(Some(ts), &user(), day(), Some(&workday()), &[]);
        assert_eq!(ts.id, 1);
        assert_eq!(ts.punch_in, Some(at(day(), 8, 30)));
        assert_eq!(ts.expected_punch_in, Some(at(day(), 13, 30)));
    }

    #[test]
    fn single_punch_is_punch_in_only() {
        let mut ts = workday_sheet(day());
        let entries = vec![entry(1, &ts, at(day(), 8, 50))];
        refresh(&mut ts, &entries, &[]);
        assert_eq!(ts.punch_in, Some(at(day(), 8, 50)));
        assert_eq!(ts.punch_out, None);
        assert!(ts.is_present);
        assert_eq!(ts.punch_in_delta, Some(Duration::minutes(-10)));
        assert_eq!(ts.punch_out_delta, None);
    }

    #[test]
    fn earliest_and_latest_punches_ignore_deleted() {
        let mut ts = workday_sheet(day());
        let mut late = entry(3, &ts, at(day(), 21, 0));
        late.is_deleted = true;
        let entries = vec![
            entry(1, &ts, at(day(), 12, 0)),
            entry(2, &ts, at(day(), 9, 5)),
            entry(4, &ts, at(day(), 18, 30)),
            late,
        ];
        refresh(&mut ts, &entries, &[]);
        assert_eq!(ts.punch_in, Some(at(day(), 9, 5)));
        assert_eq!(ts.punch_out, Some(at(day(), 18, 30)));
        assert_eq!(ts.punch_out_delta, Some(Duration::minutes(30)));
    }

    #[test]
    fn latest_approved_adjustment_wins_its_side() {
        let mut ts = workday_sheet(day());
        let entries = vec![entry(1, &ts, at(day(), 9, 0)), entry(2, &ts, at(day(), 17, 0))];
        let adj = |id, h, status, acted_h| AttendanceAdjustment {
            id,
            timesheet_id: 1,
            timestamp: at(day(), h, 0),
            category: AdjustmentCategory::PunchOut,
            status,
            description: String::new(),
            acted_by: Some(Actor::Human(2)),
            acted_at: Some(at(day() + Duration::days(1), acted_h, 0)),
        };
        let adjustments = vec![
            adj(1, 19, AdjustmentStatus::Approved, 11),
            adj(2, 20, AdjustmentStatus::Approved, 10),
            adj(3, 22, AdjustmentStatus::Declined, 12),
        ];
        refresh(&mut ts, &entries, &adjustments);
        assert_eq!(ts.punch_in, Some(at(day(), 9, 0)));
        assert_eq!(ts.punch_out, Some(at(day(), 19, 0)));
    }

    #[test]
    fn half_leave_shifts_one_boundary() {
        let mut ts = workday_sheet(day());
        apply_leave_coefficient(&mut ts, LeaveCoefficient::SecondHalf);
        assert_eq!(ts.expected_punch_in, Some(at(day(), 9, 0)));
        assert_eq!(ts.expected_punch_out, Some(at(day(), 13, 30)));

        apply_leave_coefficient(&mut ts, LeaveCoefficient::FullLeave);
        assert_eq!(ts.expected_punch_in, None);
        assert_eq!(ts.expected_punch_out, None);

        apply_leave_coefficient(&mut ts, LeaveCoefficient::NoLeave);
        assert_eq!(ts.expected_punch_out, Some(at(day(), 18, 0)));
    }

    #[test]
    fn two_halves_make_full_leave() {
        assert_eq!(
            combine_leave_parts([PartOfDay::First, PartOfDay::Second]),
            LeaveCoefficient::FullLeave
        );
        assert_eq!(combine_leave_parts([PartOfDay::Second]), LeaveCoefficient::SecondHalf);
        assert_eq!(combine_leave_parts(Vec::new()), LeaveCoefficient::NoLeave);
    }

    fn leave(id: u64, start: NaiveDate, days: i64, part: PartOfDay, status: LeaveRequestStatus) -> LeaveRequest {
        LeaveRequest {
            id,
            user_id: 7,
            leave_account_id: 5,
            start,
            end: start + Duration::days(days - 1),
            part_of_day: part,
            balance: days as f64,
            status,
            details: String::new(),
            acted_by: Some(Actor::Human(2)),
            acted_at: Some(at(start - Duration::days(10), 9, 0)),
        }
    }

    #[test]
    fn fresh_sheet_takes_leave_approved_in_advance() {
        let requests = vec![leave(1, day() - Duration::days(1), 3, PartOfDay::Full, LeaveRequestStatus::Approved)];
        let mut ts = materialize(None, &user(), day(), Some(&workday()), &[]);
        apply_leave_coefficient(&mut ts, leave_on(&requests, day()));
        assert_eq!(ts.leave_coefficient, LeaveCoefficient::FullLeave);
        assert_eq!(ts.expected_punch_in, None);

        let outside = day() + Duration::days(2);
        assert_eq!(leave_on(&requests, outside), LeaveCoefficient::NoLeave);
    }

    #[test]
    fn cancelled_request_falls_back_to_remaining_leave() {
        let mut requests = vec![
            leave(1, day(), 1, PartOfDay::First, LeaveRequestStatus::Approved),
            leave(2, day(), 1, PartOfDay::Second, LeaveRequestStatus::Approved),
            leave(3, day(), 1, PartOfDay::Full, LeaveRequestStatus::Denied),
        ];
        assert_eq!(leave_on(&requests, day()), LeaveCoefficient::FullLeave);

        requests[1].status = LeaveRequestStatus::Cancelled;
        let mut ts = workday_sheet(day());
        apply_leave_coefficient(&mut ts, leave_on(&requests, day()));
        assert_eq!(ts.leave_coefficient, LeaveCoefficient::FirstHalf);
        assert_eq!(ts.expected_punch_in, Some(at(day(), 13, 30)));

        requests[0].status = LeaveRequestStatus::Cancelled;
        assert_eq!(leave_on(&requests, day()), LeaveCoefficient::NoLeave);
    }

    #[test]
    fn clock_appends_and_rederives() {
        let mut ts = workday_sheet(day());
        let mut entries = Vec::new();
        clock(&mut ts, &mut entries, &[], at(day(), 8, 0), EntryMethod::WebApp);
        clock(&mut ts, &mut entries, &[], at(day(), 18, 15), EntryMethod::WebApp);
        assert_eq!(entries.len(), 2);
        assert_eq!(ts.punch_in, Some(at(day(), 8, 0)));
        assert_eq!(ts.punch_out, Some(at(day(), 18, 15)));
    }
}
