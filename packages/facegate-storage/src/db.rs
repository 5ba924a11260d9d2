use std::{str::FromStr, time::Duration};

use sqlx::{
	Sqlite, SqlitePool, Transaction,
	sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};

use crate::{Result, schema};

#[derive(Clone)]
pub struct Db {
	pub pool: SqlitePool,
}
impl Db {
	pub async fn connect(cfg: &facegate_config::Storage) -> Result<Self> {
		let options = SqliteConnectOptions::from_str(&cfg.dsn)?
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Full)
			.foreign_keys(true)
			.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms));
		let pool = SqlitePoolOptions::new()
			.max_connections(cfg.pool_max_conns)
			.acquire_timeout(Duration::from_millis(cfg.acquire_timeout_ms))
			.connect_with(options)
			.await?;

		Ok(Self { pool })
	}

	pub async fn ensure_schema(&self, embedding_dim: u32) -> Result<()> {
		let sql = schema::render_schema(embedding_dim);
		let mut tx = self.pool.begin().await?;

		for statement in sql.split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}

	pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
		Ok(self.pool.begin().await?)
	}

	pub async fn close(&self) {
		self.pool.close().await;
	}
}
