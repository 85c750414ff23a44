use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use stockledger_auth::Access;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::authz::authorize_access;
use crate::context::CallerContext;

/// SSE stream of the notifications routed to the caller.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    if let Err(resp) = authorize_access(&services, &caller, Access::Notifications) {
        return resp;
    }

    match services.notification_sse_stream(caller.principal()) {
        Ok(sse) => sse.into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Push an account-level notice (admin only).
pub async fn send_account_notice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<dto::AccountNoticeRequest>,
) -> axum::response::Response {
    if let Err(resp) = authorize_access(&services, &caller, Access::AccountNotices) {
        return resp;
    }
    if body.message.trim().is_empty() {
        return errors::bad_request("message must not be empty");
    }

    match services.dispatcher.notify_account(body.target_user_id, body.message) {
        Ok(delivered) => (StatusCode::ACCEPTED, Json(serde_json::json!({ "delivered": delivered }))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
