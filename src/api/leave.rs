use crate::auth::auth::AuthUser;
use crate::leave::ledger::ChainBreak;
use crate::model::leave::{
    LeaveAccount, LeaveAccountHistory, LeaveAction, LeaveRequest, LeaveRequestStatus, PartOfDay,
};
use crate::service::leave::{self as service, NewLeaveRequest};
use crate::tasks::{Task, TaskQueue};
use actix_web::{HttpResponse, Responder, web};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct AssignAccount {
    #[schema(example = 1000)]
    pub user_id: u64,
    #[schema(example = 1)]
    pub rule_id: u64,
    /// Opening balance; the rule's renewal amount applies when absent.
    #[schema(example = 10.0)]
    pub initial_balance: Option<f64>,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateLeaveRequest {
    /// Requester; defaults to the caller. Other users need HR/Admin.
    pub user_id: Option<u64>,
    #[schema(example = 1)]
    pub leave_account_id: u64,
    #[schema(example = "2024-03-11", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2024-03-12", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    #[serde(default = "full_day")]
    #[schema(example = "full")]
    pub part_of_day: PartOfDay,
    /// Days debited on approval, in steps of 0.5.
    #[schema(example = 2.0)]
    pub balance: f64,
    #[serde(default)]
    #[schema(example = "Family event")]
    pub details: String,
}

fn full_day() -> PartOfDay {
    PartOfDay::Full
}

#[derive(Serialize, ToSchema)]
pub struct LeaveRequestResponse {
    pub id: u64,
    pub user_id: u64,
    pub leave_account_id: u64,
    #[schema(format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(format = "date", value_type = String)]
    pub end_date: NaiveDate,
    pub part_of_day: PartOfDay,
    pub balance: f64,
    pub status: LeaveRequestStatus,
    pub details: String,
    pub acted_by: Option<u64>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub acted_at: Option<NaiveDateTime>,
}

impl From<&LeaveRequest> for LeaveRequestResponse {
    fn from(r: &LeaveRequest) -> Self {
        LeaveRequestResponse {
            id: r.id,
            user_id: r.user_id,
            leave_account_id: r.leave_account_id,
            start_date: r.start,
            end_date: r.end,
            part_of_day: r.part_of_day,
            balance: r.balance,
            status: r.status,
            details: r.details.clone(),
            acted_by: r.acted_by.and_then(|a| a.user_id()),
            acted_at: r.acted_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct HistoryResponse {
    pub id: u64,
    pub action: LeaveAction,
    pub previous_balance: f64,
    pub previous_usable_balance: f64,
    pub new_balance: f64,
    pub new_usable_balance: f64,
    pub accrued: Option<f64>,
    pub renewed: Option<f64>,
    pub carry_forward: Option<f64>,
    pub encashed: Option<f64>,
    pub deducted: Option<f64>,
    pub remarks: String,
    /// `null` when the system made the change.
    pub actor: Option<u64>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: NaiveDateTime,
}

impl From<&LeaveAccountHistory> for HistoryResponse {
    fn from(h: &LeaveAccountHistory) -> Self {
        HistoryResponse {
            id: h.id,
            action: h.action,
            previous_balance: h.previous_balance,
            previous_usable_balance: h.previous_usable_balance,
            new_balance: h.new_balance,
            new_usable_balance: h.new_usable_balance,
            accrued: h.accrued,
            renewed: h.renewed,
            carry_forward: h.carry_forward,
            encashed: h.encashed,
            deducted: h.deducted,
            remarks: h.remarks.clone(),
            actor: h.actor.user_id(),
            created_at: h.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AccountLedgerResponse {
    pub account: LeaveAccount,
    pub history: Vec<HistoryResponse>,
    /// First history row whose opening balance does not match the row before it.
    pub chain_break: Option<ChainBreak>,
}

#[derive(Deserialize, ToSchema)]
pub struct ManualEdit {
    #[schema(example = 12.0)]
    pub balance: f64,
    #[schema(example = 12.0)]
    pub usable_balance: f64,
    #[schema(example = "Corrected after audit")]
    pub remarks: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ArchiveAccount {
    #[schema(example = "Employee moved to another rule")]
    pub remarks: String,
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/* =========================
Assign leave account (HR/Admin)
========================= */
#[utoipa::path(
    post,
    path = "/api/leave/accounts",
    request_body = AssignAccount,
    responses(
        (status = 200, description = "Leave account assigned", body = LeaveAccount),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User or rule not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn assign_account(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<AssignAccount>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let account = service::assign_account(
        pool.get_ref(),
        payload.user_id,
        payload.rule_id,
        payload.initial_balance,
        auth.actor(),
        now(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(account))
}

/* =========================
Account with its ledger
========================= */
#[utoipa::path(
    get,
    path = "/api/leave/accounts/{id}",
    params(("id" = u64, Path, description = "Leave account id")),
    responses(
        (status = 200, description = "Account and history", body = AccountLedgerResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Leave account not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn get_account(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let ledger = service::account_ledger(pool.get_ref(), path.into_inner()).await?;
    auth.require_self_or_hr(ledger.account.user_id)?;

    Ok(HttpResponse::Ok().json(AccountLedgerResponse {
        history: ledger.history.iter().map(HistoryResponse::from).collect(),
        account: ledger.account,
        chain_break: ledger.chain_break,
    }))
}

/* =========================
Manual balance edit (HR/Admin)
========================= */
#[utoipa::path(
    put,
    path = "/api/leave/accounts/{id}/balance",
    params(("id" = u64, Path, description = "Leave account id")),
    request_body = ManualEdit,
    responses(
        (status = 200, description = "Balance updated", body = LeaveAccount),
        (status = 400, description = "Invalid balance"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn edit_balance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<ManualEdit>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let account = service::manual_edit(
        pool.get_ref(),
        path.into_inner(),
        payload.balance,
        payload.usable_balance,
        &payload.remarks,
        auth.actor(),
        now(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(account))
}

/* =========================
Archive leave account (HR/Admin)
========================= */
#[utoipa::path(
    delete,
    path = "/api/leave/accounts/{id}",
    params(("id" = u64, Path, description = "Leave account id")),
    request_body = ArchiveAccount,
    responses(
        (status = 200, description = "Account archived",
         body = Object,
         example = json!({"message": "Leave account archived"})
        ),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Account already archived")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn archive_account(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<ArchiveAccount>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let account = service::archive_account(
        pool.get_ref(),
        path.into_inner(),
        &payload.remarks,
        auth.actor(),
        now(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Leave account archived",
        "account": account,
    })))
}

/* =========================
Create leave request
========================= */
#[utoipa::path(
    post,
    path = "/api/leave/requests",
    request_body = CreateLeaveRequest,
    responses(
        (status = 200, description = "Leave request created", body = LeaveRequestResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Insufficient balance")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn create_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateLeaveRequest>,
) -> actix_web::Result<impl Responder> {
    let payload = payload.into_inner();
    let user_id = payload.user_id.unwrap_or(auth.user_id);
    auth.require_self_or_hr(user_id)?;

    let request = service::create_request(
        pool.get_ref(),
        NewLeaveRequest {
            user_id,
            leave_account_id: payload.leave_account_id,
            start: payload.start_date,
            end: payload.end_date,
            part_of_day: payload.part_of_day,
            balance: payload.balance,
            details: payload.details,
        },
    )
    .await?;
    Ok(HttpResponse::Ok().json(LeaveRequestResponse::from(&request)))
}

/* =========================
Approve leave request (HR/Admin)
========================= */
#[utoipa::path(
    put,
    path = "/api/leave/requests/{id}/approve",
    params(("id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, description = "Leave approved, balance debited and timesheets updated",
         body = LeaveRequestResponse),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request is not pending"),
        (status = 409, description = "Insufficient balance")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn approve_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let request =
        service::approve_request(pool.get_ref(), path.into_inner(), auth.actor(), now()).await?;
    Ok(HttpResponse::Ok().json(LeaveRequestResponse::from(&request)))
}

/* =========================
Deny leave request (HR/Admin)
========================= */
#[utoipa::path(
    put,
    path = "/api/leave/requests/{id}/deny",
    params(("id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, description = "Leave denied", body = LeaveRequestResponse),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request is not pending")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn deny_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let request =
        service::deny_request(pool.get_ref(), path.into_inner(), auth.actor(), now()).await?;
    Ok(HttpResponse::Ok().json(LeaveRequestResponse::from(&request)))
}

/* =========================
Cancel leave request (owner or HR/Admin)
========================= */
#[utoipa::path(
    put,
    path = "/api/leave/requests/{id}/cancel",
    params(("id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, description = "Leave cancelled; an approved request is refunded",
         body = LeaveRequestResponse),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Request already closed")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn cancel_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let request_id = path.into_inner();
    let existing = service::leave_request(pool.get_ref(), request_id).await?;
    auth.require_self_or_hr(existing.user_id)?;

    let request = service::cancel_request(pool.get_ref(), request_id, auth.actor(), now()).await?;
    Ok(HttpResponse::Ok().json(LeaveRequestResponse::from(&request)))
}

/* =========================
Run the accrual / renewal / deduction cycle (HR/Admin)
========================= */
#[utoipa::path(
    post,
    path = "/api/leave/cycle",
    responses(
        (status = 202, description = "Cycle queued",
         body = Object,
         example = json!({"message": "Leave cycle queued", "task_id": "3f1c2d8e-5b7a-4c1e-9f0a-2b6d8e4c1a7f"})
        ),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn run_cycle(
    auth: AuthUser,
    queue: web::Data<TaskQueue>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;
    let task_id = queue.enqueue(Task::LeaveCycle)?;
    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "message": "Leave cycle queued",
        "task_id": task_id.to_string(),
    })))
}
