use axum::{
    extract::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use http::{HeaderName, HeaderValue, Uri};
use tower::ServiceBuilder;
use tower_http::{
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::Level;

use kstore_slo::errors;

use crate::{controllers::keys, AppState};

const TRACE_ID: HeaderName = HeaderName::from_static("x-trace-id");

pub struct AppRouter;

impl AppRouter {
    pub fn build(state: AppState) -> Router {
        Router::new()
            .merge(keys::new_router(state))
            .layer(
                ServiceBuilder::new().layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(LatencyUnit::Millis),
                        ),
                ),
            )
            .layer(middleware::from_fn(Self::trace))
            .fallback(Self::not_found)
    }

    /// Echoes the caller's trace id, minting one when absent.
    async fn trace(mut request: Request, next: Next) -> Response {
        let trace_id = match request.headers().get(&TRACE_ID) {
            Some(value) => value.clone(),
            None => {
                let value = HeaderValue::from_str(
                    &uuid::Uuid::new_v4().hyphenated().to_string(),
                )
                .unwrap_or(HeaderValue::from_static("-"));
                request.headers_mut().insert(TRACE_ID, value.clone());
                value
            }
        };
        let mut response = next.run(request).await;
        response.headers_mut().insert(TRACE_ID, trace_id);
        response
    }

    async fn not_found(uri: Uri) -> impl IntoResponse {
        errors::not_found(&format!("no route for {}", uri))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{self, Body};
    use clap::Parser;
    use http::StatusCode;
    use serde_json::Value;
    use tower::ServiceExt;

    use kstore_storage::KeyMemory;

    use super::*;
    use crate::{App, AppConfig};

    async fn router() -> Router {
        let config = AppConfig::try_parse_from([
            "kstore",
            "--database-url",
            "mysql://kstore@localhost/kstore",
        ])
        .unwrap();
        let app = App::new(Arc::new(KeyMemory::new()), config).unwrap();
        app.key_store.init().await.unwrap();
        app.key_store.stop();
        AppRouter::build(AppState(Arc::new(app)))
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Response) {
        let response = router
            .oneshot(http::Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        (response.status(), response)
    }

    async fn json(response: Response) -> Value {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn lists_public_keys() {
        let (status, response) = get(router().await, "/v1/keys").await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.headers().contains_key(&TRACE_ID));

        let value = json(response).await;
        assert_eq!(value.as_array().unwrap().len(), 1);
        let key = &value[0];
        assert!(key["publicKey"]
            .as_str()
            .unwrap()
            .starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(key["expiresAt"].is_i64());
        assert!(!value.to_string().contains("PRIVATE"));
    }

    #[tokio::test]
    async fn serves_jwks() {
        let (status, response) =
            get(router().await, "/.well-known/jwks.json").await;
        assert_eq!(status, StatusCode::OK);

        let value = json(response).await;
        assert_eq!(value["keys"].as_array().unwrap().len(), 1);
        assert_eq!(value["keys"][0]["alg"], "RS256");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (status, response) = get(router().await, "/v1/secrets").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["code"], "1010002");
    }

    #[tokio::test]
    async fn keeps_caller_trace_id() {
        let response = router()
            .await
            .oneshot(
                http::Request::get("/v1/keys")
                    .header(&TRACE_ID, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[&TRACE_ID], "abc-123");
    }
}
