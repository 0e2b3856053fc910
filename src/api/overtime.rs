use super::attendance::write_kind;
use crate::attendance::recalibration::Trigger;
use crate::auth::auth::AuthUser;
use crate::service::attendance::recalibrate_timesheet;
use crate::service::overtime::{self as service, BatchReport, OvertimeBatch};
use crate::tasks::{Task, TaskQueue};
use actix_web::{HttpResponse, Responder, web};
use chrono::Local;
use sqlx::MySqlPool;

/* =========================
Generate overtime for a date range (HR/Admin)
========================= */
#[utoipa::path(
    post,
    path = "/api/overtime/generate",
    request_body = OvertimeBatch,
    responses(
        (status = 200, description = "Overtime generated; per-sheet failures are listed in the report",
         body = BatchReport),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Invalid range")
    ),
    security(("bearer_auth" = [])),
    tag = "Overtime"
)]
pub async fn generate(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<OvertimeBatch>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let report = service::generate_overtime(
        pool.get_ref(),
        &payload,
        auth.actor(),
        Local::now().naive_local(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(report))
}

/* =========================
Queue overtime generation (HR/Admin)
========================= */
#[utoipa::path(
    post,
    path = "/api/overtime/generate/queue",
    request_body = OvertimeBatch,
    responses(
        (status = 202, description = "Generation queued",
         body = Object,
         example = json!({"message": "Overtime generation queued", "task_id": "3f1c2d8e-5b7a-4c1e-9f0a-2b6d8e4c1a7f"})
        ),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Overtime"
)]
pub async fn enqueue_generate(
    auth: AuthUser,
    queue: web::Data<TaskQueue>,
    payload: web::Json<OvertimeBatch>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let task_id = queue.enqueue(Task::GenerateOvertime {
        batch: payload.into_inner(),
        actor: auth.actor(),
    })?;
    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "message": "Overtime generation queued",
        "task_id": task_id.to_string(),
    })))
}

/* =========================
Recalibrate one timesheet (HR/Admin)
========================= */
#[utoipa::path(
    post,
    path = "/api/overtime/timesheets/{id}/recalibrate",
    params(("id" = u64, Path, description = "Timesheet id")),
    responses(
        (status = 200, description = "Overtime recalibrated",
         body = Object,
         example = json!({"timesheet_id": 1, "overtime": "updated"})
        ),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Timesheet not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Overtime"
)]
pub async fn recalibrate(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let timesheet_id = path.into_inner();
    let write = recalibrate_timesheet(
        pool.get_ref(),
        timesheet_id,
        auth.actor(),
        Trigger::Batch,
        Local::now().naive_local(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "timesheet_id": timesheet_id,
        "overtime": write_kind(&write),
    })))
}
