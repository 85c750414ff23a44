use axum::{
    routing::{get, post},
    Router,
};

pub mod assignments;
pub mod audit;
pub mod notifications;
pub mod stock;
pub mod system;

/// Router for all endpoints that need a caller identity.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/assignments/me", get(assignments::my_inventories))
        .route("/managers/:manager/inventories", get(assignments::inventories_of_manager))
        .route("/audit-logs", get(audit::query_audit_logs))
        .route("/notifications/stream", get(notifications::stream))
        .route("/notifications/account", post(notifications::send_account_notice))
        .nest("/inventories/:inv", inventory_router())
}

fn inventory_router() -> Router {
    stock::router().merge(assignments::inventory_router())
}
