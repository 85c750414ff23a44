use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockledger_core::LedgerError;

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    let status = match &err {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::AlreadyExists(_) | LedgerError::Conflict(_) => StatusCode::CONFLICT,
        LedgerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        LedgerError::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::TransportUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    json_error(status, err.code(), err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn bad_request(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_argument", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_ledger_errors_to_status_codes() {
        let cases = [
            (LedgerError::not_found("x"), StatusCode::NOT_FOUND),
            (LedgerError::already_exists("x"), StatusCode::CONFLICT),
            (LedgerError::conflict("x"), StatusCode::CONFLICT),
            (LedgerError::invalid_argument("x"), StatusCode::BAD_REQUEST),
            (
                LedgerError::InsufficientStock {
                    available: 1,
                    requested: 2,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (LedgerError::transport_unavailable("x"), StatusCode::SERVICE_UNAVAILABLE),
            (LedgerError::storage("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ledger_error_to_response(err).status(), status);
        }
    }
}
