use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use stockledger_auth::Access;
use stockledger_core::{InventoryId, LedgerResult, ProductId};
use stockledger_inventory::{StockEntry, StockKey};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::CallerContext;

/// Routes nested under `/inventories/:inv`.
pub fn router() -> Router {
    Router::new()
        .route("/products", get(list_entries))
        .route(
            "/products/:prod",
            get(get_entry).post(link_product).delete(unlink_product),
        )
        .route("/products/:prod/increase", post(increase_stock))
        .route("/products/:prod/decrease", post(decrease_stock))
        .route("/products/:prod/quantity", put(set_quantity))
        .route("/products/:prod/min-stock", put(update_min_stock))
}

/// Resolve the path key and check the caller may touch its inventory.
fn authorized_key(
    services: &AppServices,
    caller: &CallerContext,
    inv: &str,
    prod: &str,
) -> Result<StockKey, axum::response::Response> {
    let inventory_id: InventoryId = dto::parse_id(inv)?;
    let product_id: ProductId = dto::parse_id(prod)?;
    crate::authz::authorize_access(services, caller, Access::Stock(inventory_id))?;
    Ok(StockKey::new(inventory_id, product_id))
}

fn entry_response(status: StatusCode, result: LedgerResult<StockEntry>) -> axum::response::Response {
    match result {
        Ok(entry) => (status, Json(dto::StockEntryResponse::from(entry))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_entries(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(inv): Path<String>,
) -> axum::response::Response {
    let inventory_id: InventoryId = match dto::parse_id(&inv) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = crate::authz::authorize_access(&services, &caller, Access::Stock(inventory_id)) {
        return resp;
    }

    match services.ledger.list_inventory(inventory_id).await {
        Ok(entries) => {
            let body: Vec<dto::StockEntryResponse> = entries.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path((inv, prod)): Path<(String, String)>,
) -> axum::response::Response {
    let key = match authorized_key(&services, &caller, &inv, &prod) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    entry_response(StatusCode::OK, services.ledger.get(key).await)
}

pub async fn link_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path((inv, prod)): Path<(String, String)>,
    Json(body): Json<dto::LinkStockRequest>,
) -> axum::response::Response {
    let key = match authorized_key(&services, &caller, &inv, &prod) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let result = services
        .ledger
        .link(key, body.quantity, body.min_stock_quantity, Some(caller.user_id()))
        .await;
    entry_response(StatusCode::CREATED, result)
}

pub async fn unlink_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path((inv, prod)): Path<(String, String)>,
) -> axum::response::Response {
    let key = match authorized_key(&services, &caller, &inv, &prod) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    entry_response(StatusCode::OK, services.ledger.unlink(key, Some(caller.user_id())).await)
}

pub async fn increase_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path((inv, prod)): Path<(String, String)>,
    Json(body): Json<dto::DeltaRequest>,
) -> axum::response::Response {
    let key = match authorized_key(&services, &caller, &inv, &prod) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let result = services.ledger.increase(key, body.delta, Some(caller.user_id())).await;
    entry_response(StatusCode::OK, result)
}

pub async fn decrease_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path((inv, prod)): Path<(String, String)>,
    Json(body): Json<dto::DeltaRequest>,
) -> axum::response::Response {
    let key = match authorized_key(&services, &caller, &inv, &prod) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let result = services.ledger.decrease(key, body.delta, Some(caller.user_id())).await;
    entry_response(StatusCode::OK, result)
}

pub async fn set_quantity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path((inv, prod)): Path<(String, String)>,
    Json(body): Json<dto::SetQuantityRequest>,
) -> axum::response::Response {
    let key = match authorized_key(&services, &caller, &inv, &prod) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let result = services
        .ledger
        .set_quantity(key, body.quantity, Some(caller.user_id()))
        .await;
    entry_response(StatusCode::OK, result)
}

pub async fn update_min_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path((inv, prod)): Path<(String, String)>,
    Json(body): Json<dto::MinStockRequest>,
) -> axum::response::Response {
    let key = match authorized_key(&services, &caller, &inv, &prod) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let result = services
        .ledger
        .update_min_stock(key, body.min_stock_quantity, Some(caller.user_id()))
        .await;
    entry_response(StatusCode::OK, result)
}
