mod error;

pub use error::{Error, Result};

use std::{env, future::Future, path::PathBuf};

use tokio::fs;
use uuid::Uuid;

const SIDE_FILE_SUFFIXES: [&str; 3] = ["", "-wal", "-shm"];

/// A throwaway SQLite database file under the system temp directory.
pub struct TestDatabase {
	name: String,
	dir: PathBuf,
	path: PathBuf,
	dsn: String,
	cleaned: bool,
}
impl TestDatabase {
	pub async fn new() -> Result<Self> {
		let name = format!("facegate_test_{}", Uuid::new_v4().simple());
		let dir = env::var_os("FACEGATE_TEST_DIR").map(PathBuf::from).unwrap_or_else(env::temp_dir);

		fs::create_dir_all(&dir)
			.await
			.map_err(|err| Error::Message(format!("Failed to create test directory: {err}.")))?;

		let path = dir.join(format!("{name}.db"));
		let dsn = format!("sqlite://{}", path.display());

		Ok(Self { name, dir, path, dsn, cleaned: false })
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn path(&self) -> &PathBuf {
		&self.path
	}

	pub fn storage_config(&self, embedding_dim: u32) -> facegate_config::Storage {
		facegate_config::Storage {
			dsn: self.dsn.clone(),
			pool_max_conns: 4,
			busy_timeout_ms: 5_000,
			acquire_timeout_ms: 5_000,
			embedding_dim,
		}
	}

	pub async fn cleanup(mut self) -> Result<()> {
		self.cleanup_inner().await
	}

	async fn cleanup_inner(&mut self) -> Result<()> {
		if self.cleaned {
			return Ok(());
		}

		for suffix in SIDE_FILE_SUFFIXES {
			let file = self.dir.join(format!("{}.db{suffix}", self.name));

			match fs::remove_file(&file).await {
				Ok(()) => {},
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
				Err(err) => return Err(err.into()),
			}
		}

		self.cleaned = true;

		Ok(())
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		if self.cleaned {
			return;
		}

		for suffix in SIDE_FILE_SUFFIXES {
			let file = self.dir.join(format!("{}.db{suffix}", self.name));

			if let Err(err) = std::fs::remove_file(&file)
				&& err.kind() != std::io::ErrorKind::NotFound
			{
				eprintln!("Test database cleanup failed for {}: {err}.", file.display());
			}
		}
	}
}

pub async fn with_test_db<F, Fut, T>(f: F) -> Result<T>
where
	F: FnOnce(&TestDatabase) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let db = TestDatabase::new().await?;
	let result = f(&db).await;
	let mut db = db;

	if let Err(err) = db.cleanup_inner().await {
		eprintln!("Test database cleanup warning: {err}.");

		if result.is_ok() {
			return Err(err);
		}
	}

	result
}
