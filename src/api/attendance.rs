use crate::attendance::recalibration::OvertimeWrite;
use crate::auth::auth::AuthUser;
use crate::model::adjustment::{AdjustmentCategory, AdjustmentStatus, AttendanceAdjustment};
use crate::model::overtime::{ClaimStatus, OvertimeDetailHistory, OvertimeEntry};
use crate::model::timesheet::{
    Coefficient, EntryMethod, LeaveCoefficient, TimeSheet, TimeSheetEntry,
};
use crate::service::attendance as service;
use actix_web::{HttpResponse, Responder, web};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct ClockReq {
    /// Whose punch this is; defaults to the caller. Other users need HR/Admin.
    #[schema(example = 1000)]
    pub user_id: Option<u64>,
    /// Defaults to now.
    #[schema(example = "2024-03-04T08:58:00", format = "date-time", value_type = Option<String>)]
    pub timestamp: Option<NaiveDateTime>,
    #[schema(example = "web_app")]
    pub entry_method: EntryMethod,
}

#[derive(Serialize, ToSchema)]
pub struct TimeSheetResponse {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 1000)]
    pub user_id: u64,
    #[schema(example = "2024-03-04", format = "date", value_type = String)]
    pub timesheet_for: NaiveDate,
    pub work_shift_id: Option<u64>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub expected_punch_in: Option<NaiveDateTime>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub expected_punch_out: Option<NaiveDateTime>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub punch_in: Option<NaiveDateTime>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub punch_out: Option<NaiveDateTime>,
    /// Seconds; positive means late.
    pub punch_in_delta_secs: Option<i64>,
    pub punch_out_delta_secs: Option<i64>,
    pub coefficient: Coefficient,
    pub leave_coefficient: LeaveCoefficient,
    pub is_present: bool,
}

impl From<&TimeSheet> for TimeSheetResponse {
    fn from(ts: &TimeSheet) -> Self {
        TimeSheetResponse {
            id: ts.id,
            user_id: ts.user_id,
            timesheet_for: ts.timesheet_for,
            work_shift_id: ts.work_shift_id,
            expected_punch_in: ts.expected_punch_in,
            expected_punch_out: ts.expected_punch_out,
            punch_in: ts.punch_in,
            punch_out: ts.punch_out,
            punch_in_delta_secs: ts.punch_in_delta.map(|d| d.num_seconds()),
            punch_out_delta_secs: ts.punch_out_delta.map(|d| d.num_seconds()),
            coefficient: ts.coefficient,
            leave_coefficient: ts.leave_coefficient,
            is_present: ts.is_present,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct EntryResponse {
    pub id: u64,
    #[schema(format = "date-time", value_type = String)]
    pub timestamp: NaiveDateTime,
    pub entry_method: EntryMethod,
    pub is_deleted: bool,
}

impl From<&TimeSheetEntry> for EntryResponse {
    fn from(e: &TimeSheetEntry) -> Self {
        EntryResponse {
            id: e.id,
            timestamp: e.timestamp,
            entry_method: e.entry_method,
            is_deleted: e.is_deleted,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AdjustmentResponse {
    pub id: u64,
    pub timesheet_id: u64,
    #[schema(format = "date-time", value_type = String)]
    pub timestamp: NaiveDateTime,
    pub category: AdjustmentCategory,
    pub status: AdjustmentStatus,
    pub description: String,
    /// `null` for pending adjustments and for system decisions.
    pub acted_by: Option<u64>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub acted_at: Option<NaiveDateTime>,
}

impl From<&AttendanceAdjustment> for AdjustmentResponse {
    fn from(a: &AttendanceAdjustment) -> Self {
        AdjustmentResponse {
            id: a.id,
            timesheet_id: a.timesheet_id,
            timestamp: a.timestamp,
            category: a.category,
            status: a.status,
            description: a.description.clone(),
            acted_by: a.acted_by.and_then(|actor| actor.user_id()),
            acted_at: a.acted_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct OvertimeResponse {
    pub id: u64,
    pub overtime_setting_id: u64,
    pub claim_status: ClaimStatus,
    #[schema(example = 7200)]
    pub punch_in_overtime_secs: i64,
    #[schema(example = 3600)]
    pub punch_out_overtime_secs: i64,
    pub claimed_overtime_secs: Option<i64>,
}

impl From<&OvertimeEntry> for OvertimeResponse {
    fn from(e: &OvertimeEntry) -> Self {
        OvertimeResponse {
            id: e.id,
            overtime_setting_id: e.overtime_setting_id,
            claim_status: e.claim_status,
            punch_in_overtime_secs: e.detail.punch_in_overtime.num_seconds(),
            punch_out_overtime_secs: e.detail.punch_out_overtime.num_seconds(),
            claimed_overtime_secs: e.detail.claimed_overtime.map(|d| d.num_seconds()),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct OvertimeHistoryResponse {
    pub actor: Option<u64>,
    pub previous_punch_in_overtime_secs: i64,
    pub previous_punch_out_overtime_secs: i64,
    pub current_punch_in_overtime_secs: i64,
    pub current_punch_out_overtime_secs: i64,
    #[schema(example = "Re-calibrated for 2024-03-04 after adjustment approval by user #3")]
    pub remarks: String,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: NaiveDateTime,
}

impl From<&OvertimeDetailHistory> for OvertimeHistoryResponse {
    fn from(h: &OvertimeDetailHistory) -> Self {
        OvertimeHistoryResponse {
            actor: h.actor.user_id(),
            previous_punch_in_overtime_secs: h.previous_punch_in_overtime.num_seconds(),
            previous_punch_out_overtime_secs: h.previous_punch_out_overtime.num_seconds(),
            current_punch_in_overtime_secs: h.current_punch_in_overtime.num_seconds(),
            current_punch_out_overtime_secs: h.current_punch_out_overtime.num_seconds(),
            remarks: h.remarks.clone(),
            created_at: h.created_at,
        }
    }
}

/// Short name of a recalibration outcome for responses.
pub fn write_kind(write: &OvertimeWrite) -> String {
    match write {
        OvertimeWrite::Create(_) => "created".to_string(),
        OvertimeWrite::Update { .. } => "updated".to_string(),
        OvertimeWrite::Delete(_) => "deleted".to_string(),
        OvertimeWrite::Unchanged => "unchanged".to_string(),
        OvertimeWrite::Locked(status) => format!("locked ({status})"),
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/* =========================
Clock in / out
========================= */
#[utoipa::path(
    post,
    path = "/api/attendance/clock",
    request_body = ClockReq,
    responses(
        (status = 200, description = "Punch recorded",
         body = Object,
         example = json!({
            "message": "Punch recorded",
            "timesheet": {"id": 1, "timesheet_for": "2024-03-04", "coefficient": "workday"},
            "entry_id": 10,
            "overtime": "unchanged"
         })
        ),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn clock(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<ClockReq>,
) -> actix_web::Result<impl Responder> {
    let user_id = payload.user_id.unwrap_or(auth.user_id);
    auth.require_self_or_hr(user_id)?;
    let now = now();
    let timestamp = payload.timestamp.unwrap_or(now);

    let outcome = service::clock(
        pool.get_ref(),
        user_id,
        timestamp,
        payload.entry_method,
        auth.actor(),
        now,
    )
    .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Punch recorded",
        "timesheet": TimeSheetResponse::from(&outcome.timesheet),
        "entry_id": outcome.entry.id,
        "overtime": write_kind(&outcome.overtime),
    })))
}

/* =========================
Get timesheet with punches, adjustments and overtime
========================= */
#[utoipa::path(
    get,
    path = "/api/attendance/timesheets/{id}",
    params(("id" = u64, Path, description = "Timesheet id")),
    responses(
        (status = 200, description = "Timesheet found", body = Object),
        (status = 404, description = "Timesheet not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn get_timesheet(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let view = service::timesheet(pool.get_ref(), path.into_inner()).await?;
    auth.require_self_or_hr(view.timesheet.user_id)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "timesheet": TimeSheetResponse::from(&view.timesheet),
        "entries": view.entries.iter().map(EntryResponse::from).collect::<Vec<_>>(),
        "adjustments": view.adjustments.iter().map(AdjustmentResponse::from).collect::<Vec<_>>(),
        "overtime": view.overtime.as_ref().map(OvertimeResponse::from),
        "overtime_history": view
            .overtime_history
            .iter()
            .map(OvertimeHistoryResponse::from)
            .collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize, ToSchema)]
pub struct MaterializeReq {
    #[schema(example = 1000)]
    pub user_id: u64,
    #[schema(example = "2024-03-01", format = "date", value_type = String)]
    pub from: NaiveDate,
    #[schema(example = "2024-03-31", format = "date", value_type = String)]
    pub to: NaiveDate,
}

/* =========================
Materialize a date range (HR/Admin)
========================= */
#[utoipa::path(
    post,
    path = "/api/attendance/materialize",
    request_body = MaterializeReq,
    responses(
        (status = 200, description = "Timesheets materialized", body = [TimeSheetResponse]),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn materialize(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<MaterializeReq>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let sheets = service::materialize_range(
        pool.get_ref(),
        payload.user_id,
        payload.from,
        payload.to,
        auth.actor(),
        now(),
    )
    .await?;

    let body: Vec<TimeSheetResponse> = sheets.iter().map(TimeSheetResponse::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

#[derive(Deserialize, ToSchema)]
pub struct CreateAdjustment {
    #[schema(example = 1)]
    pub timesheet_id: u64,
    #[schema(example = "2024-03-04T19:00:00", format = "date-time", value_type = String)]
    pub timestamp: NaiveDateTime,
    #[schema(example = "punch_out")]
    pub category: AdjustmentCategory,
    #[schema(example = "Forgot to punch out")]
    pub description: String,
}

/* =========================
Request attendance adjustment
========================= */
#[utoipa::path(
    post,
    path = "/api/attendance/adjustments",
    request_body = CreateAdjustment,
    responses(
        (status = 200, description = "Adjustment requested", body = AdjustmentResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Timesheet not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn create_adjustment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateAdjustment>,
) -> actix_web::Result<impl Responder> {
    let view = service::timesheet(pool.get_ref(), payload.timesheet_id).await?;
    auth.require_self_or_hr(view.timesheet.user_id)?;

    let payload = payload.into_inner();
    let adjustment = service::request_adjustment(
        pool.get_ref(),
        payload.timesheet_id,
        payload.timestamp,
        payload.category,
        payload.description,
        auth.user_id,
    )
    .await?;

    Ok(HttpResponse::Ok().json(AdjustmentResponse::from(&adjustment)))
}

/* =========================
Approve attendance adjustment (HR/Admin)
========================= */
#[utoipa::path(
    put,
    path = "/api/attendance/adjustments/{id}/approve",
    params(("id" = u64, Path, description = "Adjustment id")),
    responses(
        (status = 200, description = "Adjustment approved and overtime recalibrated",
         body = Object,
         example = json!({"message": "Adjustment approved", "overtime": "created"})
        ),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Adjustment already decided")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn approve_adjustment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let (adjustment, write) =
        service::approve_adjustment(pool.get_ref(), path.into_inner(), auth.actor(), now()).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Adjustment approved",
        "adjustment": AdjustmentResponse::from(&adjustment),
        "overtime": write_kind(&write),
    })))
}

/* =========================
Decline attendance adjustment (HR/Admin)
========================= */
#[utoipa::path(
    put,
    path = "/api/attendance/adjustments/{id}/decline",
    params(("id" = u64, Path, description = "Adjustment id")),
    responses(
        (status = 200, description = "Adjustment declined", body = AdjustmentResponse),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Adjustment already decided")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn decline_adjustment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let adjustment =
        service::decline_adjustment(pool.get_ref(), path.into_inner(), auth.actor(), now()).await?;
    Ok(HttpResponse::Ok().json(AdjustmentResponse::from(&adjustment)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::materializer::fixtures::{at, workday_sheet};
    use chrono::Duration;

    #[test]
    fn timesheet_response_exposes_deltas_in_seconds() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let mut ts = workday_sheet(day);
        ts.punch_in = Some(at(day, 9, 15));
        ts.punch_in_delta = Some(Duration::minutes(15));

        let value = serde_json::to_value(TimeSheetResponse::from(&ts)).unwrap();
        assert_eq!(value["punch_in_delta_secs"], 900);
        assert_eq!(value["coefficient"], "workday");
        assert_eq!(value["leave_coefficient"], "no_leave");
        assert_eq!(value["timesheet_for"], "2024-03-04");
    }

    #[test]
    fn locked_write_names_the_claim() {
        assert_eq!(write_kind(&OvertimeWrite::Locked(ClaimStatus::Approved)), "locked (approved)");
        assert_eq!(write_kind(&OvertimeWrite::Unchanged), "unchanged");
    }
}
