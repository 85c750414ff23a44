use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use stockledger_auth::Access;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::CallerContext;

/// `GET /audit-logs`: filtered, sorted view of the audit trail (admin only).
pub async fn query_audit_logs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Query(params): Query<dto::AuditLogParams>,
) -> axum::response::Response {
    if let Err(resp) = crate::authz::authorize_access(&services, &caller, Access::AuditTrail) {
        return resp;
    }

    let query = match params.into_query() {
        Ok(q) => q,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    match services.store.query_audit(&query).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => errors::ledger_error_to_response(e.into()),
    }
}
