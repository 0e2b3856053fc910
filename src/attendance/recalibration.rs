use chrono::NaiveDateTime;
use strum_macros::{AsRefStr, Display};

use super::materializer;
use super::overtime::{self, OvertimeDurations};
use crate::error::AppResult;
use crate::model::actor::Actor;
use crate::model::adjustment::AttendanceAdjustment;
use crate::model::leave::CompensatoryRule;
use crate::model::overtime::{
    ClaimStatus, OvertimeDetail, OvertimeDetailHistory, OvertimeEntry, OvertimeSetting,
};
use crate::model::timesheet::{TimeSheet, TimeSheetEntry};

/// Upstream change that caused a recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum Trigger {
    #[strum(serialize = "punch")]
    Punch,
    #[strum(serialize = "adjustment approval")]
    AdjustmentApproved,
    #[strum(serialize = "leave approval")]
    LeaveApproved,
    #[strum(serialize = "leave cancellation")]
    LeaveCancelled,
    #[strum(serialize = "overtime generation")]
    Batch,
}

/// The single write needed to bring stored overtime in line with a sheet.
#[derive(Debug, Clone, PartialEq)]
pub enum OvertimeWrite {
    Create(OvertimeEntry),
    Update {
        entry: OvertimeEntry,
        history: OvertimeDetailHistory,
    },
    Delete(OvertimeEntry),
    Unchanged,
    /// A claim is in flight or settled; the stored entry is left as is.
    Locked(ClaimStatus),
}

impl OvertimeWrite {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            OvertimeWrite::Create(_) | OvertimeWrite::Update { .. } | OvertimeWrite::Delete(_)
        )
    }
}

fn matches_stored(entry: &OvertimeEntry, computed: &OvertimeDurations) -> bool {
    entry.detail.punch_in_overtime == computed.punch_in
        && entry.detail.punch_out_overtime == computed.punch_out
        && entry.detail.claimed_overtime == Some(computed.claimed)
}

pub struct PlanContext<'a> {
    pub setting: Option<&'a OvertimeSetting>,
    pub actor: Actor,
    pub trigger: Trigger,
    pub now: NaiveDateTime,
}

/// Compares a fresh calculation with the stored entry.
pub fn plan_write(
    ts: &TimeSheet,
    existing: Option<&OvertimeEntry>,
    computed: Option<OvertimeDurations>,
    ctx: &PlanContext<'_>,
) -> OvertimeWrite {
    match (existing, computed) {
        (None, None) => OvertimeWrite::Unchanged,
        (Some(entry), Some(c)) if matches_stored(entry, &c) => OvertimeWrite::Unchanged,
        (Some(entry), _) if !entry.claim_status.allows_recalibration() => {
            OvertimeWrite::Locked(entry.claim_status)
        }
        (Some(entry), None) => OvertimeWrite::Delete(entry.clone()),
        (None, Some(c)) => OvertimeWrite::Create(OvertimeEntry {
            id: 0,
            user_id: ts.user_id,
            timesheet_id: ts.id,
            overtime_setting_id: ctx.setting.map(|s| s.id).unwrap_or_default(),
            claim_status: ClaimStatus::Unclaimed,
            detail: OvertimeDetail {
                punch_in_overtime: c.punch_in,
                punch_out_overtime: c.punch_out,
                claimed_overtime: Some(c.claimed),
            },
        }),
        (Some(entry), Some(c)) => {
            let history = OvertimeDetailHistory {
                entry_id: entry.id,
                actor: ctx.actor,
                previous_punch_in_overtime: entry.detail.punch_in_overtime,
                previous_punch_out_overtime: entry.detail.punch_out_overtime,
                current_punch_in_overtime: c.punch_in,
                current_punch_out_overtime: c.punch_out,
                remarks: format!(
                    "Re-calibrated for {} after {} by {}",
                    ts.timesheet_for, ctx.trigger, ctx.actor
                ),
                created_at: ctx.now,
            };
            let mut updated = entry.clone();
            updated.detail = OvertimeDetail {
                punch_in_overtime: c.punch_in,
                punch_out_overtime: c.punch_out,
                claimed_overtime: Some(c.claimed),
            };
            if let Some(setting) = ctx.setting {
                updated.overtime_setting_id = setting.id;
            }
            OvertimeWrite::Update {
                entry: updated,
                history,
            }
        }
    }
}

/// Re-derives the sheet from its punches and adjustments, recomputes its
/// overtime and plans the resulting write. Always a full recompute, so
/// applying triggers in any order converges.
pub fn refresh_and_plan(
    ts: &mut TimeSheet,
    entries: &[TimeSheetEntry],
    adjustments: &[AttendanceAdjustment],
    compensatory: &[CompensatoryRule],
    existing: Option<&OvertimeEntry>,
    ctx: &PlanContext<'_>,
) -> AppResult<OvertimeWrite> {
    materializer::refresh(ts, entries, adjustments);
    let computed = match ctx.setting {
        Some(setting) => overtime::compute(ts, setting, compensatory)?,
        None => None,
    };
    Ok(plan_write(ts, existing, computed, ctx))
}

/// Applies a planned write to an in-memory entry slot.
pub fn apply(slot: &mut Option<OvertimeEntry>, write: &OvertimeWrite) {
    match write {
        OvertimeWrite::Create(entry) | OvertimeWrite::Update { entry, .. } => {
            *slot = Some(entry.clone())
        }
        OvertimeWrite::Delete(_) => *slot = None,
        OvertimeWrite::Unchanged | OvertimeWrite::Locked(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::materializer::fixtures::*;
    use crate::attendance::materializer::apply_leave_coefficient;
    use crate::model::adjustment::{AdjustmentCategory, AdjustmentStatus};
    use crate::model::timesheet::LeaveCoefficient;
    use chrono::{Duration, NaiveDate};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn ctx(setting: &OvertimeSetting, trigger: Trigger) -> PlanContext<'_> {
        PlanContext {
            setting: Some(setting),
            actor: Actor::Human(2),
            trigger,
            now: at(day() + Duration::days(1), 10, 0),
        }
    }

    #[test]
    fn recompute_is_idempotent() {
        let setting = OvertimeSetting::default();
        let mut ts = workday_sheet(day());
        let entries = vec![entry(1, &ts, at(day(), 7, 0)), entry(2, &ts, at(day(), 20, 0))];
        let mut stored = None;

        let first = refresh_and_plan(&mut ts, &entries, &[], &[], stored.as_ref(), &ctx(&setting, Trigger::Batch)).unwrap();
        assert!(matches!(first, OvertimeWrite::Create(_)));
        apply(&mut stored, &first);

        let second = refresh_and_plan(&mut ts, &entries, &[], &[], stored.as_ref(), &ctx(&setting, Trigger::Batch)).unwrap();
        assert_eq!(second, OvertimeWrite::Unchanged);
        let entry = stored.unwrap();
        assert_eq!(entry.detail.punch_in_overtime, Duration::hours(2));
        assert_eq!(entry.detail.punch_out_overtime, Duration::hours(2));
    }

    #[test]
    fn approved_punch_out_adjustment_creates_entry() {
        let setting = OvertimeSetting::default();
        let mut ts = workday_sheet(day());
        let entries = vec![entry(1, &ts, at(day(), 9, 0))];
        let mut stored = None;

        let before = refresh_and_plan(&mut ts, &entries, &[], &[], None, &ctx(&setting, Trigger::Punch)).unwrap();
        assert_eq!(before, OvertimeWrite::Unchanged);
        apply(&mut stored, &before);
        assert!(stored.is_none());

        let mut adjustment = AttendanceAdjustment {
            id: 5,
            timesheet_id: ts.id,
            timestamp: at(day(), 19, 0),
            category: AdjustmentCategory::PunchOut,
            status: AdjustmentStatus::Pending,
            description: "missed punch out".into(),
            acted_by: None,
            acted_at: None,
        };
        adjustment.approve(Actor::Human(2), at(day() + Duration::days(1), 9, 0)).unwrap();

        let after = refresh_and_plan(
            &mut ts,
            &entries,
            &[adjustment],
            &[],
            stored.as_ref(),
            &ctx(&setting, Trigger::AdjustmentApproved),
        )
        .unwrap();
        match after {
            OvertimeWrite::Create(entry) => {
                assert_eq!(entry.detail.punch_in_overtime, Duration::zero());
                assert_eq!(entry.detail.punch_out_overtime, Duration::hours(1));
                assert_eq!(entry.claim_status, ClaimStatus::Unclaimed);
            }
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn full_leave_rewrites_existing_entry_with_history() {
        let setting = OvertimeSetting::default();
        let mut ts = workday_sheet(day());
        let entries = vec![entry(1, &ts, at(day(), 12, 0)), entry(2, &ts, at(day(), 18, 0))];

        // Late arrival, on-time departure: no overtime yet.
        let first = refresh_and_plan(&mut ts, &entries, &[], &[], None, &ctx(&setting, Trigger::Punch)).unwrap();
        assert_eq!(first, OvertimeWrite::Unchanged);

        apply_leave_coefficient(&mut ts, LeaveCoefficient::FullLeave);
        let write = refresh_and_plan(&mut ts, &entries, &[], &[], None, &ctx(&setting, Trigger::LeaveApproved)).unwrap();
        let mut stored = None;
        apply(&mut stored, &write);
        let mut entry = stored.clone().unwrap();
        assert_eq!(entry.detail.punch_in_overtime, Duration::hours(6));
        assert_eq!(entry.detail.punch_out_overtime, Duration::zero());

        entry.id = 11;
        apply_leave_coefficient(&mut ts, LeaveCoefficient::FirstHalf);
        let write = refresh_and_plan(&mut ts, &entries, &[], &[], Some(&entry), &ctx(&setting, Trigger::LeaveCancelled)).unwrap();
        match write {
            OvertimeWrite::Update { entry, history } => {
                assert_eq!(entry.id, 11);
                assert_eq!(entry.detail.punch_in_overtime, Duration::minutes(90));
                assert_eq!(history.previous_punch_in_overtime, Duration::hours(6));
                assert_eq!(history.current_punch_in_overtime, Duration::minutes(90));
                assert!(history.remarks.contains("leave cancellation"));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn vanished_overtime_deletes_entry() {
        let setting = OvertimeSetting::default();
        let mut ts = workday_sheet(day());
        let entries = vec![entry(1, &ts, at(day(), 9, 0)), entry(2, &ts, at(day(), 18, 0))];
        let stale = OvertimeEntry {
            id: 4,
            user_id: 7,
            timesheet_id: ts.id,
            overtime_setting_id: 0,
            claim_status: ClaimStatus::Declined,
            detail: OvertimeDetail {
                punch_in_overtime: Duration::hours(1),
                punch_out_overtime: Duration::zero(),
                claimed_overtime: Some(Duration::hours(1)),
            },
        };
        let write = refresh_and_plan(&mut ts, &entries, &[], &[], Some(&stale), &ctx(&setting, Trigger::Batch)).unwrap();
        assert!(matches!(write, OvertimeWrite::Delete(ref e) if e.id == 4));
    }

    #[test]
    fn claimed_entry_is_locked() {
        let setting = OvertimeSetting::default();
        let mut ts = workday_sheet(day());
        let entries = vec![entry(1, &ts, at(day(), 9, 0)), entry(2, &ts, at(day(), 18, 0))];
        let claimed = OvertimeEntry {
            id: 4,
            user_id: 7,
            timesheet_id: ts.id,
            overtime_setting_id: 0,
            claim_status: ClaimStatus::Approved,
            detail: OvertimeDetail {
                punch_in_overtime: Duration::hours(1),
                punch_out_overtime: Duration::zero(),
                claimed_overtime: Some(Duration::hours(1)),
            },
        };
        let write = refresh_and_plan(&mut ts, &entries, &[], &[], Some(&claimed), &ctx(&setting, Trigger::Batch)).unwrap();
        assert_eq!(write, OvertimeWrite::Locked(ClaimStatus::Approved));
        assert!(!write.is_write());
    }
}
