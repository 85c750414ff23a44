use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use stockledger_auth::Access;
use stockledger_core::{InventoryId, UserId};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::authz::authorize_access;
use crate::context::CallerContext;

/// Routes nested under `/inventories/:inv`.
pub fn inventory_router() -> Router {
    Router::new()
        .route("/managers", get(managers_of_inventory))
        .route("/managers/:manager", post(assign_manager).delete(unassign_manager))
}

fn inventories_response(services: &AppServices, manager_id: UserId) -> axum::response::Response {
    let inventory_ids = services.registry.inventories_for_manager(manager_id).into_iter().collect();
    (
        StatusCode::OK,
        Json(dto::ManagerInventoriesResponse {
            manager_id,
            inventory_ids,
        }),
    )
        .into_response()
}

/// Inventories the caller manages (the client-side membership check).
pub async fn my_inventories(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    if let Err(resp) = authorize_access(&services, &caller, Access::AssignmentsOf(caller.user_id())) {
        return resp;
    }
    inventories_response(&services, caller.user_id())
}

pub async fn inventories_of_manager(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(manager): Path<String>,
) -> axum::response::Response {
    let manager_id: UserId = match dto::parse_id(&manager) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize_access(&services, &caller, Access::AssignmentsOf(manager_id)) {
        return resp;
    }
    inventories_response(&services, manager_id)
}

pub async fn managers_of_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(inv): Path<String>,
) -> axum::response::Response {
    let inventory_id: InventoryId = match dto::parse_id(&inv) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize_access(&services, &caller, Access::ManageAssignments) {
        return resp;
    }

    let manager_ids = services.registry.managers_for_inventory(inventory_id).into_iter().collect();
    (
        StatusCode::OK,
        Json(dto::InventoryManagersResponse {
            inventory_id,
            manager_ids,
        }),
    )
        .into_response()
}

fn parse_pair(inv: &str, manager: &str) -> Result<(InventoryId, UserId), axum::response::Response> {
    Ok((dto::parse_id(inv)?, dto::parse_id(manager)?))
}

pub async fn assign_manager(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path((inv, manager)): Path<(String, String)>,
) -> axum::response::Response {
    let (inventory_id, manager_id) = match parse_pair(&inv, &manager) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize_access(&services, &caller, Access::ManageAssignments) {
        return resp;
    }

    match services
        .registry
        .assign(inventory_id, manager_id, Some(caller.user_id()))
        .await
    {
        Ok(assignment) => (StatusCode::CREATED, Json(assignment)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn unassign_manager(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path((inv, manager)): Path<(String, String)>,
) -> axum::response::Response {
    let (inventory_id, manager_id) = match parse_pair(&inv, &manager) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize_access(&services, &caller, Access::ManageAssignments) {
        return resp;
    }

    match services
        .registry
        .unassign(inventory_id, manager_id, Some(caller.user_id()))
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
