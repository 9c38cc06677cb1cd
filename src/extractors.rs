//! Request extractors for the public and admin routers.
//!
//! Axum's stock extractors answer a bad body or path with `text/plain`.
//! Payment clients (the map popup, the checkout page, reviewer tools) parse
//! every non-2xx body as `{error, details}`, so these wrappers route the
//! rejection through [`AppError`] instead. Rejections are logged at debug
//! with the type the handler asked for, which is usually enough to tell a
//! stale client build from a hand-crafted request.

use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::AppError;

fn rejected<E: std::fmt::Display>(kind: &str, target: &str, uri: &axum::http::Uri, err: E) {
    tracing::debug!(
        "Rejected {} for {} on {}: {}",
        kind,
        target,
        uri.path(),
        err
    );
}

/// Request body as JSON, or the response body when returned from a handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

impl<S, T> FromRequest<S> for Json<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let uri = req.uri().clone();
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Json(value)),
            Err(e) => {
                rejected("body", std::any::type_name::<T>(), &uri, &e);
                Err(e.into())
            }
        }
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

/// Route parameters such as `/venues/{venue_id}` or `/orders/{order_id}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Path<T>(pub T);

impl<S, T> FromRequestParts<S> for Path<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        axum::extract::Path::<T>::from_request_parts(parts, state)
            .await
            .map(|axum::extract::Path(value)| Path(value))
            .map_err(|e| {
                rejected("path", std::any::type_name::<T>(), &parts.uri, &e);
                e.into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::StatusCode, routing::post};
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize, Serialize)]
    struct Amount {
        amount_minor: i64,
    }

    async fn echo(Path(order_id): Path<u32>, Json(body): Json<Amount>) -> Json<serde_json::Value> {
        Json(serde_json::json!({ "order_id": order_id, "amount_minor": body.amount_minor }))
    }

    fn app() -> Router {
        Router::new().route("/orders/{order_id}", post(echo))
    }

    async fn call(uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_valid_request_round_trips_as_json() {
        let (status, body) = call("/orders/7", r#"{"amount_minor": 19900}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order_id"], 7);
        assert_eq!(body["amount_minor"], 19900);
    }

    #[tokio::test]
    async fn test_bad_body_is_a_json_error() {
        let (status, body) = call("/orders/7", r#"{"amount_minor": "lots"}"#).await;
        assert!(status.is_client_error());
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_bad_path_is_a_json_error() {
        let (status, body) = call("/orders/not-a-number", r#"{"amount_minor": 1}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }
}
