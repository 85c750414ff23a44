use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use stockledger_auth::{Principal, Role};
use stockledger_core::UserId;

use crate::app::errors;
use crate::context::CallerContext;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Resolve the caller from trusted gateway headers.
///
/// Missing or malformed identity is rejected with 401 before any handler runs.
pub async fn identity_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let principal = extract_principal(req.headers())
        .map_err(|message| errors::json_error(StatusCode::UNAUTHORIZED, "unauthenticated", message))?;

    req.extensions_mut().insert(CallerContext::new(principal));
    Ok(next.run(req).await)
}

fn extract_principal(headers: &HeaderMap) -> Result<Principal, String> {
    let user_id: UserId = header(headers, USER_ID_HEADER)?
        .parse()
        .map_err(|_| format!("{USER_ID_HEADER} must be an integer"))?;
    let role: Role = header(headers, USER_ROLE_HEADER)?
        .parse()
        .map_err(|e| format!("{USER_ROLE_HEADER}: {e}"))?;

    Ok(Principal::new(user_id, role))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, String> {
    let value = headers
        .get(name)
        .ok_or_else(|| format!("missing {name} header"))?
        .to_str()
        .map_err(|_| format!("{name} is not valid ascii"))?
        .trim();

    if value.is_empty() {
        return Err(format!("empty {name} header"));
    }
    Ok(value)
}
