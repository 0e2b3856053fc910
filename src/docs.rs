use crate::api::attendance::{
    AdjustmentResponse, ClockReq, CreateAdjustment, EntryResponse, MaterializeReq,
    OvertimeHistoryResponse, OvertimeResponse, TimeSheetResponse,
};
use crate::api::leave::{
    AccountLedgerResponse, ArchiveAccount, AssignAccount, CreateLeaveRequest, HistoryResponse,
    LeaveRequestResponse, ManualEdit,
};
use crate::leave::ledger::ChainBreak;
use crate::model::adjustment::{AdjustmentCategory, AdjustmentStatus};
use crate::model::leave::{LeaveAccount, LeaveAction, LeaveRequestStatus, PartOfDay};
use crate::model::overtime::{ClaimStatus, OvertimeCalculation};
use crate::model::timesheet::{Coefficient, EntryMethod, LeaveCoefficient};
use crate::service::leave::CycleReport;
use crate::service::overtime::{BatchFailure, BatchReport, OvertimeBatch};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HRM Ledger API",
        version = "1.0.0",
        description = r#"
## Attendance, Overtime and Leave Ledger

Back office for the time-keeping side of an HRM system.

### 🔹 Key Features
- **Attendance**
  - Clock in/out, per-day timesheets materialized from work shifts and holidays
  - Adjustment requests that replace a punch once approved
- **Overtime**
  - Per-day overtime computed from the user's overtime setting
  - Batch generation over a date range, or only for sheets missing an entry
  - Entries with a claim in flight are never rewritten
- **Leave**
  - Leave accounts with accrual, renewal, carry-forward, encashment and deduction
  - Compensatory leave granted for work on off days and holidays
  - Every balance change is written to an append-only history

### 🔐 Security
All endpoints require a **JWT Bearer** access token.
Approvals, batch runs and balance edits need the **Admin** or **HR** role.

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::api::attendance::clock,
        crate::api::attendance::get_timesheet,
        crate::api::attendance::materialize,
        crate::api::attendance::create_adjustment,
        crate::api::attendance::approve_adjustment,
        crate::api::attendance::decline_adjustment,

        crate::api::overtime::generate,
        crate::api::overtime::enqueue_generate,
        crate::api::overtime::recalibrate,

        crate::api::leave::assign_account,
        crate::api::leave::get_account,
        crate::api::leave::edit_balance,
        crate::api::leave::archive_account,
        crate::api::leave::create_request,
        crate::api::leave::approve_request,
        crate::api::leave::deny_request,
        crate::api::leave::cancel_request,
        crate::api::leave::run_cycle
    ),
    components(
        schemas(
            ClockReq,
            MaterializeReq,
            CreateAdjustment,
            TimeSheetResponse,
            EntryResponse,
            AdjustmentResponse,
            OvertimeResponse,
            OvertimeHistoryResponse,
            OvertimeBatch,
            BatchReport,
            BatchFailure,
            AssignAccount,
            CreateLeaveRequest,
            ManualEdit,
            ArchiveAccount,
            LeaveAccount,
            LeaveRequestResponse,
            HistoryResponse,
            AccountLedgerResponse,
            ChainBreak,
            CycleReport,
            Coefficient,
            LeaveCoefficient,
            EntryMethod,
            AdjustmentCategory,
            AdjustmentStatus,
            ClaimStatus,
            OvertimeCalculation,
            LeaveAction,
            LeaveRequestStatus,
            PartOfDay
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Attendance", description = "Timesheets, punches and adjustments"),
        (name = "Overtime", description = "Overtime generation and recalibration"),
        (name = "Leave", description = "Leave accounts, requests and the balance ledger"),
    )
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route_with_bearer_auth() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/attendance/clock"));
        assert!(doc.paths.paths.contains_key("/api/overtime/generate"));
        assert!(doc.paths.paths.contains_key("/api/leave/requests/{id}/cancel"));
        assert_eq!(doc.paths.paths.len(), 17);

        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer_auth"));
        assert!(components.schemas.contains_key("BatchReport"));
    }
}
