//! Frame source backed by a spool directory that a camera process keeps writing images into.

use std::{
	path::{Path, PathBuf},
	time::{Duration, SystemTime},
};

use time::OffsetDateTime;
use tokio::fs;

use facegate_service::{BoxFuture, Error, Frame, FrameSource, Result};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Yields the newest image in `dir` each time a newer one appears. Older images that were
/// overwritten by newer ones before a pull are skipped, never queued.
pub struct SpoolSource {
	dir: PathBuf,
	poll: Duration,
	last: Option<(SystemTime, PathBuf)>,
}
impl SpoolSource {
	pub fn new(dir: impl Into<PathBuf>, poll: Duration) -> Self {
		Self { dir: dir.into(), poll, last: None }
	}

	async fn newest(&self) -> Result<Option<(SystemTime, PathBuf)>> {
		let mut entries = fs::read_dir(&self.dir).await.map_err(|err| spool_error(&self.dir, err))?;
		let mut newest: Option<(SystemTime, PathBuf)> = None;

		while let Some(entry) = entries.next_entry().await.map_err(|err| spool_error(&self.dir, err))? {
			let path = entry.path();

			if !is_image(&path) {
				continue;
			}

			let Ok(metadata) = entry.metadata().await else {
				continue;
			};

			if !metadata.is_file() {
				continue;
			}

			let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

			if newest.as_ref().is_none_or(|current| (modified, &path) > (current.0, &current.1)) {
				newest = Some((modified, path));
			}
		}

		Ok(newest)
	}
}
impl FrameSource for SpoolSource {
	fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Frame>>> {
		Box::pin(async move {
			loop {
				let newest = self.newest().await?;

				if let Some(candidate) = newest
					&& self.last.as_ref() != Some(&candidate)
				{
					let image =
						fs::read(&candidate.1).await.map_err(|err| spool_error(&candidate.1, err))?;
					let label = candidate
						.1
						.file_name()
						.map(|name| name.to_string_lossy().into_owned())
						.unwrap_or_default();
					let captured_at = OffsetDateTime::from(candidate.0);

					self.last = Some(candidate);

					return Ok(Some(Frame { label, image, captured_at }));
				}

				tokio::time::sleep(self.poll).await;
			}
		})
	}
}

fn is_image(path: &Path) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

fn spool_error(path: &Path, err: std::io::Error) -> Error {
	Error::Provider { message: format!("Failed to read spool {}: {err}.", path.display()) }
}
