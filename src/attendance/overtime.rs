use chrono::Duration;

use crate::error::AppResult;
use crate::model::leave::CompensatoryRule;
use crate::model::overtime::{ApplicableAfter, OffdayOvertimePolicy, OvertimeSetting, SlotBehavior};
use crate::model::timesheet::{Coefficient, LeaveCoefficient, TimeSheet};

/// Result of one calculator run. Only produced when an entry should exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OvertimeDurations {
    pub punch_in: Duration,
    pub punch_out: Duration,
    pub claimed: Duration,
}

impl OvertimeDurations {
    pub fn total(&self) -> Duration {
        self.punch_in + self.punch_out
    }
}

fn zero() -> Duration {
    Duration::zero()
}

/// Rounds a duration to whole slots.
///
/// `Up` counts a partial slot as a full one, `Down` drops it and `Const`
/// returns the duration untouched. Callers validate the setting first.
pub fn slot_trim(duration: Duration, setting: &OvertimeSetting) -> Duration {
    if !setting.calculate_overtime_in_slots || duration <= zero() {
        return duration.max(zero());
    }
    let slot = match setting.slot_duration_in_minutes {
        Some(m) if m > 0 => i64::from(m) * 60,
        _ => return duration,
    };
    let seconds = duration.num_seconds();
    let (whole, remainder) = (seconds / slot, seconds % slot);
    match setting.slot_behavior_for_remainder {
        SlotBehavior::Up if remainder > 0 => Duration::seconds((whole + 1) * slot),
        SlotBehavior::Up | SlotBehavior::Down => Duration::seconds(whole * slot),
        SlotBehavior::Const => duration,
    }
}

/// Overtime for a day with an expected window: early arrival and late
/// departure, gated by the qualification thresholds.
fn workday_overtime(ts: &TimeSheet, setting: &OvertimeSetting) -> (Duration, Duration) {
    let early = match (ts.expected_punch_in, ts.punch_in) {
        (Some(expected), Some(actual)) => (expected - actual).max(zero()),
        _ => zero(),
    };
    let late = match (ts.expected_punch_out, ts.punch_out) {
        (Some(expected), Some(actual)) => (actual - expected).max(zero()),
        _ => zero(),
    };

    let early_excess = (early - Duration::minutes(i64::from(setting.applicable_before))).max(zero());
    let late_excess = (late - Duration::minutes(i64::from(setting.applicable_after))).max(zero());
    let (early_pass, late_pass) = (early_excess > zero(), late_excess > zero());

    let (gen_early, gen_late) = match setting.overtime_applicable_only_after {
        ApplicableAfter::Both => (early_pass, late_pass),
        ApplicableAfter::Either => (early_pass || late_pass, early_pass || late_pass),
    };

    let mut punch_in = if gen_early { early } else { zero() };
    let mut punch_out = if gen_late { late } else { zero() };

    let deduct = setting.deduct_overtime_after_for;
    if deduct.punch_in() {
        punch_in = if gen_early { early_excess } else { zero() };
    }
    if deduct.punch_out() {
        punch_out = if gen_late { late_excess } else { zero() };
    }

    (slot_trim(punch_in, setting), slot_trim(punch_out, setting))
}

/// Best compensatory tier earned by `worked`, highest grant first.
pub fn qualifying_rule(rules: &[CompensatoryRule], worked: Duration) -> Option<&CompensatoryRule> {
    let hours = worked.num_seconds() as f64 / 3600.0;
    rules
        .iter()
        .filter(|r| r.hours_in_off_day <= hours)
        .max_by(|a, b| {
            a.balance_to_grant
                .total_cmp(&b.balance_to_grant)
                .then(a.hours_in_off_day.total_cmp(&b.hours_in_off_day))
        })
}

/// Off-day, holiday and full-leave work: the whole worked span is overtime,
/// booked on the punch-in side.
fn whole_day_overtime(
    worked: Duration,
    policy: OffdayOvertimePolicy,
    compensatory: &[CompensatoryRule],
    setting: &OvertimeSetting,
) -> Duration {
    let overtime = match policy {
        OffdayOvertimePolicy::GenerateBoth => worked,
        OffdayOvertimePolicy::NoOvertime => zero(),
        OffdayOvertimePolicy::GenerateAfterDeduction if compensatory.is_empty() => worked,
        OffdayOvertimePolicy::GenerateAfterDeduction => match qualifying_rule(compensatory, worked) {
            Some(rule) => {
                let deduction = Duration::seconds((rule.hours_in_off_day * 3600.0).round() as i64);
                (worked - deduction).max(zero())
            }
            None => zero(),
        },
    };
    slot_trim(overtime, setting)
}

fn claim_limit(ts: &TimeSheet, setting: &OvertimeSetting) -> Option<u32> {
    if ts.leave_coefficient != LeaveCoefficient::NoLeave && ts.coefficient == Coefficient::Workday {
        return setting.leave_overtime_limit;
    }
    match ts.coefficient {
        Coefficient::Workday => setting.daily_overtime_limit,
        Coefficient::Offday => setting.off_day_overtime_limit,
        Coefficient::Holiday => setting.holiday_overtime_limit,
    }
}

/// Punch-in and punch-out overtime for one timesheet.
///
/// Returns `Ok(None)` when no overtime entry should exist for the sheet.
/// `compensatory` are the tiers of the user's compensatory leave rule, if
/// any, consulted by the `generate_after_deduction` policy.
pub fn compute(
    ts: &TimeSheet,
    setting: &OvertimeSetting,
    compensatory: &[CompensatoryRule],
) -> AppResult<Option<OvertimeDurations>> {
    if !setting.enable_overtime {
        return Ok(None);
    }
    setting.validate()?;

    if ts.punch_in.is_none() && ts.punch_out.is_none() {
        return Ok(None);
    }

    let whole_day = |enabled: bool, policy: OffdayOvertimePolicy| -> Option<(Duration, Duration)> {
        if !enabled {
            return None;
        }
        let worked = ts.worked()?;
        Some((whole_day_overtime(worked, policy, compensatory, setting), zero()))
    };

    let sides = match (ts.coefficient, ts.leave_coefficient) {
        (Coefficient::Offday, _) => whole_day(setting.off_day_overtime, setting.overtime_after_offday),
        (Coefficient::Holiday, _) => whole_day(
            setting.paid_holiday_affect_overtime,
            setting.overtime_after_holiday,
        ),
        (Coefficient::Workday, LeaveCoefficient::FullLeave) => {
            whole_day(setting.leave_affect_overtime, OffdayOvertimePolicy::GenerateBoth)
        }
        // half-day leave keeps the shifted work window as baseline
        (Coefficient::Workday, _) => Some(workday_overtime(ts, setting)),
    };

    let Some((punch_in, punch_out)) = sides else {
        return Ok(None);
    };

    let total = punch_in + punch_out;
    let flat_reject = Duration::minutes(i64::from(setting.flat_reject_value));
    if total <= zero() || total < flat_reject {
        tracing::debug!(
            timesheet_id = ts.id,
            total_secs = total.num_seconds(),
            flat_reject_value = setting.flat_reject_value,
            "Overtime rejected below flat value"
        );
        return Ok(None);
    }

    let claimed = match claim_limit(ts, setting) {
        Some(limit) => total.min(Duration::minutes(i64::from(limit))),
        None => total,
    };

    Ok(Some(OvertimeDurations {
        punch_in,
        punch_out,
        claimed,
    }))
}
