use std::{ops::Deref, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::info;

use kstore_slo::errors;
use kstore_storage::KeyInterface;

use crate::{
    services::key::{KeyStore, RsaKeyGenerator, SystemClock},
    AppConfig,
};

pub type SharedKeyStore = Arc<KeyStore<Arc<dyn KeyInterface>>>;

pub struct App {
    pub config: AppConfig,
    pub key_store: SharedKeyStore,
}

impl App {
    pub fn new(store: Arc<dyn KeyInterface>, config: AppConfig) -> Result<Self> {
        info!("initializing key store...");

        let key_store = KeyStore::new(
            store,
            RsaKeyGenerator::default(),
            Arc::new(SystemClock),
            config.key_store_config(),
        )?;

        Ok(Self {
            config,
            key_store: Arc::new(key_store),
        })
    }
}

#[derive(Clone)]
pub struct AppState(pub Arc<App>);

// deref so you can still access the inner fields easily
impl Deref for AppState {
    type Target = App;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AppState
where
    Self: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = errors::WithBacktrace;
    async fn from_request_parts(
        _: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self::from_ref(state))
    }
}
