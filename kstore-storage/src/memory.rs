use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use kstore_slo::{errors, Result};

use crate::{
    key::{KeyInterface, ListParams, SigningKey},
    List,
};

/// Process-local row store. Every statement runs under one lock, so the
/// demote and insert of a promotion are observed together.
#[derive(Clone, Debug, Default)]
pub struct KeyMemory {
    rows: Arc<RwLock<Vec<SigningKey>>>,
}

impl KeyMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyInterface for KeyMemory {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn current(&self) -> Result<Option<SigningKey>> {
        let rows = self.rows.read().map_err(errors::any)?;
        Ok(rows.iter().find(|row| row.is_current).cloned())
    }

    async fn get(
        &self,
        kid: &str,
        valid_at: DateTime<Utc>,
    ) -> Result<Option<SigningKey>> {
        let rows = self.rows.read().map_err(errors::any)?;
        Ok(rows
            .iter()
            .find(|row| row.kid == kid && row.is_live(valid_at))
            .cloned())
    }

    async fn list(
        &self,
        opts: &ListParams,
        output: &mut List<SigningKey>,
    ) -> Result<()> {
        let rows = self.rows.read().map_err(errors::any)?;
        output.data.extend(
            rows.iter()
                .rev()
                .filter(|row| opts.valid_at.map_or(true, |at| row.is_live(at)))
                .cloned(),
        );
        output.total = output.data.len() as i64;
        Ok(())
    }

    async fn promote(&self, key: &SigningKey) -> Result<()> {
        let mut rows = self.rows.write().map_err(errors::any)?;
        if rows.iter().any(|row| row.kid == key.kid) {
            return Err(errors::anyhow(anyhow::anyhow!(
                "duplicate kid {}",
                key.kid
            )));
        }
        for row in rows.iter_mut().filter(|row| row.is_current) {
            row.is_current = false;
        }
        rows.push(SigningKey {
            is_current: true,
            ..key.clone()
        });
        Ok(())
    }

    async fn purge(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.write().map_err(errors::any)?;
        let len = rows.len();
        rows.retain(|row| row.is_current || row.expires_at >= before);
        Ok((len - rows.len()) as u64)
    }
}
