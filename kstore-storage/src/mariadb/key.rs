use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{mysql::MySqlRow, MySqlPool, Row};

use kstore_slo::{errors, Result};

use crate::{
    key::{KeyInterface, ListParams, SigningKey},
    List,
};

#[derive(Clone, Debug)]
pub struct KeyImpl {
    pool: MySqlPool,
}

impl KeyImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &MySqlRow) -> Result<SigningKey> {
        Ok(SigningKey {
            kid: row.try_get::<String, _>("kid").map_err(errors::any)?,
            public_key: row
                .try_get::<String, _>("public_key")
                .map_err(errors::any)?,
            private_key: row
                .try_get::<String, _>("private_key")
                .map_err(errors::any)?,
            created_at: row
                .try_get::<DateTime<Utc>, _>("created_at")
                .map_err(errors::any)?,
            expires_at: row
                .try_get::<DateTime<Utc>, _>("expires_at")
                .map_err(errors::any)?,
            is_current: row
                .try_get::<bool, _>("is_current")
                .map_err(errors::any)?,
        })
    }
}

#[async_trait]
impl KeyInterface for KeyImpl {
    #[tracing::instrument]
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS `signing_key` (
            `kid` VARCHAR(64) NOT NULL,
            `public_key` TEXT NOT NULL,
            `private_key` TEXT NOT NULL,
            `created_at` DATETIME(6) NOT NULL,
            `expires_at` DATETIME(6) NOT NULL,
            `is_current` BOOLEAN NOT NULL DEFAULT FALSE,
            PRIMARY KEY (`kid`),
            KEY `idx_expires_at` (`expires_at`)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;"#,
        )
        .execute(&self.pool)
        .await
        .map_err(errors::any)?;
        Ok(())
    }

    #[tracing::instrument]
    async fn current(&self) -> Result<Option<SigningKey>> {
        let row = sqlx::query(
            r#"SELECT `kid`,`public_key`,`private_key`,`created_at`,`expires_at`,`is_current`
            FROM `signing_key`
            WHERE `is_current` = TRUE
            LIMIT 1;"#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(errors::any)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    #[tracing::instrument]
    async fn get(
        &self,
        kid: &str,
        valid_at: DateTime<Utc>,
    ) -> Result<Option<SigningKey>> {
        let row = sqlx::query(
            r#"SELECT `kid`,`public_key`,`private_key`,`created_at`,`expires_at`,`is_current`
            FROM `signing_key`
            WHERE `kid` = ? AND `expires_at` > ?;"#,
        )
        .bind(kid)
        .bind(valid_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(errors::any)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    #[tracing::instrument]
    async fn list(
        &self,
        opts: &ListParams,
        output: &mut List<SigningKey>,
    ) -> Result<()> {
        let mut wheres = String::new();
        if opts.valid_at.is_some() {
            wheres.push_str(" WHERE `expires_at` > ?");
        }
        let sql = format!(
            r#"SELECT `kid`,`public_key`,`private_key`,`created_at`,`expires_at`,`is_current`
            FROM `signing_key`{}
            ORDER BY `created_at` DESC;"#,
            wheres,
        );
        let mut query = sqlx::query(sql.as_str());
        if let Some(valid_at) = opts.valid_at {
            query = query.bind(valid_at);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(errors::any)?;
        for row in rows.iter() {
            output.data.push(Self::from_row(row)?);
        }
        output.total = output.data.len() as i64;
        Ok(())
    }

    #[tracing::instrument]
    async fn promote(&self, key: &SigningKey) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(errors::any)?;
        sqlx::query(
            r#"UPDATE `signing_key` SET `is_current` = FALSE
            WHERE `is_current` = TRUE;"#,
        )
        .execute(&mut *tx)
        .await
        .map_err(errors::any)?;
        sqlx::query(
            r#"INSERT INTO `signing_key`
            (`kid`,`public_key`,`private_key`,`created_at`,`expires_at`,`is_current`)
            VALUES(?,?,?,?,?,TRUE);"#,
        )
        .bind(&key.kid)
        .bind(&key.public_key)
        .bind(&key.private_key)
        .bind(key.created_at)
        .bind(key.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(errors::any)?;
        // dropping an uncommitted transaction rolls it back
        tx.commit().await.map_err(errors::any)?;
        Ok(())
    }

    #[tracing::instrument]
    async fn purge(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM `signing_key`
            WHERE `expires_at` < ? AND `is_current` = FALSE;"#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(errors::any)?;
        Ok(result.rows_affected())
    }
}
