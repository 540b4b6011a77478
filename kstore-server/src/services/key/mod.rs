mod clock;
mod generator;
mod jwks;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    sync::{watch, Mutex},
    task,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use kstore_slo::{errors, Result};
use kstore_storage::{KeyInterface, List, ListParams, PublicKey, SigningKey};

use crate::services::token::{self, Claims};

pub use clock::{Clock, ManualClock, SystemClock};
pub use generator::{KeyGenerator, KeyPair, RsaKeyGenerator};
pub use jwks::{to_jwk, JsonWebKeySet};

const MIN_TOKEN_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStoreConfig {
    /// How often a new signing key is generated.
    pub rotation_interval: Duration,
    /// How long a retired key keeps verifying after the next rotation.
    pub grace_period: Duration,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            rotation_interval: Duration::from_secs(24 * 60 * 60),
            grace_period: Duration::from_secs(48 * 60 * 60),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Owns the set of signing keys: issues tokens with the current key,
/// verifies them with whichever live key the token names, and rotates the
/// current key on a schedule.
///
/// Every key lives for `rotation_interval + grace_period`, so a token signed
/// just before a rotation stays verifiable through the grace period.
pub struct KeyStore<S, G = RsaKeyGenerator> {
    store: S,
    generator: G,
    clock: Arc<dyn Clock>,
    rotation_interval: Duration,
    key_lifetime: chrono::Duration,
    access_token_ttl: chrono::Duration,
    refresh_token_ttl: chrono::Duration,
    // serialises rotations; `generation` counts the completed ones
    rotation: Mutex<()>,
    generation: AtomicU64,
    initialized: Mutex<bool>,
    shutdown: watch::Sender<bool>,
}

impl<S, G> KeyStore<S, G>
where
    S: KeyInterface + 'static,
    G: KeyGenerator,
{
    pub fn new(
        store: S,
        generator: G,
        clock: Arc<dyn Clock>,
        config: KeyStoreConfig,
    ) -> Result<Self> {
        if config.rotation_interval.is_zero() {
            return Err(errors::configuration(
                "key rotation interval must be positive",
            ));
        }
        // claims carry whole seconds
        if config.access_token_ttl < MIN_TOKEN_TTL
            || config.refresh_token_ttl < MIN_TOKEN_TTL
        {
            return Err(errors::configuration(
                "token lifetimes must be at least one second",
            ));
        }
        if Instant::now().checked_add(config.rotation_interval).is_none() {
            return Err(errors::configuration("key rotation interval too large"));
        }
        let key_lifetime = config
            .rotation_interval
            .checked_add(config.grace_period)
            .ok_or_else(|| errors::configuration("key lifetime overflows"))
            .and_then(to_chrono)?;
        if clock.now().checked_add_signed(key_lifetime).is_none() {
            return Err(errors::configuration("key lifetime overflows"));
        }

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            store,
            generator,
            clock,
            rotation_interval: config.rotation_interval,
            key_lifetime,
            access_token_ttl: to_chrono(config.access_token_ttl)?,
            refresh_token_ttl: to_chrono(config.refresh_token_ttl)?,
            rotation: Mutex::new(()),
            generation: AtomicU64::new(0),
            initialized: Mutex::new(false),
            shutdown,
        })
    }

    /// Makes sure a current key exists, then starts the rotation scheduler.
    ///
    /// Requests must not be served before this returns `Ok`. Later calls are
    /// no-ops.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }

        self.store.ensure_schema().await?;
        if self.store.current().await?.is_none() {
            info!("no current signing key, generating the first one");
            self.rotate().await?;
        }
        self.spawn_scheduler();

        *initialized = true;
        info!(
            "key store initialised, rotation every {:?}, keys live for {}s",
            self.rotation_interval,
            self.key_lifetime.num_seconds()
        );
        Ok(())
    }

    /// Cancels future scheduled rotations. A rotation already running is
    /// neither interrupted nor awaited.
    pub fn stop(&self) {
        if !self.shutdown.send_replace(true) {
            info!("stopping key rotation scheduler");
        }
    }

    fn spawn_scheduler(self: &Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return;
        }
        let key_store = Arc::downgrade(self);
        let period = self.rotation_interval;

        let Some(start) = Instant::now().checked_add(period) else {
            error!("key rotation interval {:?} too large to schedule", period);
            return;
        };

        tokio::spawn(async move {
            let mut interval = time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(key_store) = key_store.upgrade() else {
                            break;
                        };
                        info!("start scheduled key rotation...");
                        if let Err(err) = key_store.rotate().await {
                            error!("scheduled key rotation failed: {}", err);
                        }
                    },
                    _ = shutdown.changed() => {
                        break;
                    }
                }
            }
            info!("key rotation scheduler finished");
        });
    }

    /// Generates a key pair and makes it the current signing key, then
    /// deletes keys past their expiry. Returns the kid that is current
    /// afterwards.
    ///
    /// Callers that queue up behind a rotation which then succeeds return
    /// its key instead of rotating again. On error the previous current key
    /// stays in place.
    pub async fn rotate(&self) -> Result<String> {
        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.rotation.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            let current = self.current().await?;
            debug!("rotation coalesced into kid={}", current.kid);
            return Ok(current.kid);
        }

        let generator = self.generator.clone();
        let pair = task::spawn_blocking(move || generator.generate())
            .await
            .map_err(errors::any)??;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.key_lifetime)
            .ok_or_else(|| errors::configuration("key expiry out of range"))?;
        let key = SigningKey {
            kid: uuid::Uuid::new_v4().to_string(),
            public_key: pair.public_key,
            private_key: pair.private_key,
            created_at: now,
            expires_at,
            is_current: true,
        };
        self.store.promote(&key).await?;
        self.generation.fetch_add(1, Ordering::Release);
        info!("rotated signing key, new kid={}", key.kid);

        if let Err(err) = self.sweep(now).await {
            warn!("failed to purge expired signing keys: {}", err);
        }
        Ok(key.kid)
    }

    /// Deletes keys whose expiry has passed.
    pub async fn purge(&self) -> Result<u64> {
        self.sweep(self.clock.now()).await
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let purged = self.store.purge(now).await?;
        if purged > 0 {
            info!("purged {} expired signing keys", purged);
        }
        Ok(purged)
    }

    /// Signs a short-lived access token with the current key.
    pub async fn sign_access_token<P>(&self, payload: &P) -> Result<String>
    where
        P: Serialize + Sync,
    {
        self.sign(payload, self.access_token_ttl).await
    }

    /// Signs a long-lived refresh token with the current key.
    pub async fn sign_refresh_token<P>(&self, payload: &P) -> Result<String>
    where
        P: Serialize + Sync,
    {
        self.sign(payload, self.refresh_token_ttl).await
    }

    async fn sign<P>(&self, payload: &P, ttl: chrono::Duration) -> Result<String>
    where
        P: Serialize + Sync,
    {
        let payload = token::payload(payload)?;
        let key = self.current().await?;
        let now = self.clock.now().timestamp();
        let claims = Claims {
            iat: now,
            exp: now + ttl.num_seconds(),
            payload,
        };
        token::encode(&key.kid, &key.private_key, &claims)
    }

    /// Verifies `token` against the live key its header names and returns
    /// the caller payload it was signed with.
    pub async fn verify_token<P>(&self, token: &str) -> Result<P>
    where
        P: DeserializeOwned,
    {
        let kid = token::kid(token)?;
        let now = self.clock.now();
        let key = self
            .store
            .get(&kid, now)
            .await?
            .ok_or_else(errors::unknown_or_expired_key)?;

        let claims = token::decode::<P>(token, &key.public_key)?;
        if claims.exp <= now.timestamp() {
            return Err(errors::token_expired());
        }
        Ok(claims.payload)
    }

    /// Public half of every key that can still verify.
    pub async fn list_public_keys(&self) -> Result<Vec<PublicKey>> {
        let mut output = List::default();
        self.store
            .list(
                &ListParams {
                    valid_at: Some(self.clock.now()),
                },
                &mut output,
            )
            .await?;
        Ok(output.data.iter().map(PublicKey::from).collect())
    }

    pub async fn jwks(&self) -> Result<JsonWebKeySet> {
        JsonWebKeySet::from_public_keys(&self.list_public_keys().await?)
    }

    pub async fn current_kid(&self) -> Result<String> {
        Ok(self.current().await?.kid)
    }

    async fn current(&self) -> Result<SigningKey> {
        match self.store.current().await? {
            Some(key) => Ok(key),
            None => {
                error!("no current signing key, key store not initialised?");
                Err(errors::no_active_signing_key())
            }
        }
    }
}

fn to_chrono(value: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(value).map_err(|err| errors::configuration(&err))
}
