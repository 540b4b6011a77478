use axum::{routing::get, Json, Router};

use kstore_slo::Result;
use kstore_storage::PublicKey;

use crate::{services::key::JsonWebKeySet, AppState};

pub fn new_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/keys", get(list_keys))
        .route("/.well-known/jwks.json", get(jwks))
        .with_state(state)
}

/// Every key that can still verify, as PEM.
async fn list_keys(app: AppState) -> Result<Json<Vec<PublicKey>>> {
    Ok(app.key_store.list_public_keys().await?.into())
}

async fn jwks(app: AppState) -> Result<Json<JsonWebKeySet>> {
    Ok(app.key_store.jwks().await?.into())
}
