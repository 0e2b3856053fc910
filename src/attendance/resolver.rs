use chrono::NaiveDate;

use crate::error::{AppError, AppResult};
use crate::model::shift::{IndividualUserShift, WorkDay, WorkShift, WorkTiming};

/// What the shift templates say about one user on one date.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDay {
    pub assignment_id: u64,
    pub shift_id: u64,
    pub work_day_id: Option<u64>,
    /// `None` means the date is an off-day for this shift.
    pub timing: Option<WorkTiming>,
}

impl ResolvedDay {
    pub fn is_off_day(&self) -> bool {
        self.timing.is_none()
    }
}

/// Picks the assignment with the latest `applicable_from` not after `date`.
pub fn select_assignment(
    assignments: &[IndividualUserShift],
    user_id: u64,
    date: NaiveDate,
) -> AppResult<&IndividualUserShift> {
    assignments
        .iter()
        .filter(|a| a.user_id == user_id && a.applicable_from <= date)
        .max_by_key(|a| a.applicable_from)
        .filter(|a| a.applicable_to.map_or(true, |to| date <= to))
        .ok_or(AppError::NoApplicableShift { user_id, date })
}

/// Among workdays for the date's weekday, the one whose effective period
/// started last.
pub fn select_work_day(shift: &WorkShift, date: NaiveDate) -> Option<&WorkDay> {
    shift
        .work_days
        .iter()
        .filter(|wd| wd.is_effective_on(date))
        .max_by_key(|wd| wd.applicable_from)
}

/// Earliest-starting timing of the day. A user has one timesheet per date,
/// so additional timings only widen what the shift allows, not what is
/// expected.
pub fn primary_timing(work_day: &WorkDay) -> Option<&WorkTiming> {
    work_day.timings.iter().min_by_key(|t| t.start_time)
}

pub fn resolve(
    assignments: &[IndividualUserShift],
    shifts: &[WorkShift],
    user_id: u64,
    date: NaiveDate,
) -> AppResult<ResolvedDay> {
    let assignment = select_assignment(assignments, user_id, date)?;
    let shift = shifts
        .iter()
        .find(|s| s.id == assignment.shift_id)
        .ok_or_else(|| AppError::not_found(format!("work shift {}", assignment.shift_id)))?;

    let work_day = select_work_day(shift, date);
    Ok(ResolvedDay {
        assignment_id: assignment.id,
        shift_id: shift.id,
        work_day_id: work_day.map(|wd| wd.id),
        timing: work_day.and_then(primary_timing).cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn timing(id: u64, start: u32, end: u32) -> WorkTiming {
        WorkTiming {
            id,
            start_time: NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
            extends: false,
            working_minutes: (end - start) * 60,
            break_start: None,
            break_end: None,
        }
    }

    fn assignment(id: u64, shift_id: u64, from: NaiveDate, to: Option<NaiveDate>) -> IndividualUserShift {
        IndividualUserShift {
            id,
            user_id: 7,
            shift_id,
            applicable_from: from,
            applicable_to: to,
        }
    }

    fn weekday_shift(id: u64, start: u32, end: u32) -> WorkShift {
        let days = [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri];
        WorkShift {
            id,
            name: format!("shift {id}"),
            work_days: days
                .iter()
                .enumerate()
                .map(|(i, day)| WorkDay {
                    id: id * 10 + i as u64,
                    day: *day,
                    applicable_from: d(2020, 1, 1),
                    applicable_to: None,
                    timings: vec![timing(id * 100 + i as u64, start, end)],
                })
                .collect(),
        }
    }

    #[test]
    fn latest_assignment_wins() {
        let assignments = vec![
            assignment(1, 1, d(2024, 1, 1), None),
            assignment(2, 2, d(2024, 3, 1), None),
        ];
        let shifts = vec![weekday_shift(1, 9, 18), weekday_shift(2, 10, 19)];

        // 2024-02-29 is a Thursday
        let before = resolve(&assignments, &shifts, 7, d(2024, 2, 29)).unwrap();
        assert_eq!(before.shift_id, 1);

        // 2024-03-04 is a Monday
        let after = resolve(&assignments, &shifts, 7, d(2024, 3, 4)).unwrap();
        assert_eq!(after.shift_id, 2);
        assert_eq!(
            after.timing.unwrap().start_time,
            NaiveTime::from_hms_opt(10, 0, 0).unwrap()
        );
    }

    #[test]
    fn date_before_first_assignment_has_no_shift() {
        let assignments = vec![assignment(1, 1, d(2024, 1, 1), None)];
        let err = resolve(&assignments, &[weekday_shift(1, 9, 18)], 7, d(2023, 12, 29)).unwrap_err();
        assert!(matches!(err, AppError::NoApplicableShift { user_id: 7, .. }));
    }

    #[test]
    fn ended_assignment_has_no_shift() {
        let assignments = vec![assignment(1, 1, d(2024, 1, 1), Some(d(2024, 1, 31)))];
        assert!(select_assignment(&assignments, 7, d(2024, 2, 5)).is_err());
        assert!(select_assignment(&assignments, 7, d(2024, 1, 31)).is_ok());
    }

    #[test]
    fn weekend_is_off_day() {
        let assignments = vec![assignment(1, 1, d(2024, 1, 1), None)];
        // 2024-03-02 is a Saturday
        let day = resolve(&assignments, &[weekday_shift(1, 9, 18)], 7, d(2024, 3, 2)).unwrap();
        assert!(day.is_off_day());
        assert_eq!(day.work_day_id, None);
    }

    #[test]
    fn expired_work_day_is_off_day() {
        let mut shift = weekday_shift(1, 9, 18);
        for wd in shift.work_days.iter_mut() {
            wd.applicable_to = Some(d(2024, 2, 1));
        }
        let assignments = vec![assignment(1, 1, d(2024, 1, 1), None)];
        let day = resolve(&assignments, &[shift], 7, d(2024, 3, 4)).unwrap();
        assert!(day.is_off_day());
    }

    #[test]
    fn earliest_timing_is_primary() {
        let wd = WorkDay {
            id: 1,
            day: Weekday::Mon,
            applicable_from: d(2024, 1, 1),
            applicable_to: None,
            timings: vec![timing(2, 14, 18), timing(1, 8, 12)],
        };
        assert_eq!(primary_timing(&wd).map(|t| t.id), Some(1));
    }
}
