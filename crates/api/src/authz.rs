//! API-side authorization guard.
//!
//! Runs before any ledger call; manager membership is answered from the
//! assignment cache.

use axum::http::StatusCode;
use axum::response::Response;

use stockledger_auth::{Access, authorize};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::CallerContext;

pub fn authorize_access(services: &AppServices, caller: &CallerContext, access: Access) -> Result<(), Response> {
    let principal = caller.principal();
    authorize(&principal, access, |inventory_id| {
        services.registry.is_assigned(principal.user_id, inventory_id)
    })
    .map_err(|e| errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}
