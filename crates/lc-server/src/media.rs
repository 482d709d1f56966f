//! Upload directory management.
//!
//! Files are keyed by their sanitized original name; uploading the same name
//! again replaces the earlier copy. Each upload streams into its own hidden
//! `.part` file and is renamed into place once complete, so a half-written
//! upload never shows up in the listing and concurrent uploads of one name
//! never share bytes. The last one to finish wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use lc_core::config::MediaConfig;
use lc_core::events::{EventBus, EventPayload};
use lc_core::{Error, Result};

/// A file in the upload directory.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct MediaFile {
    pub name: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

/// The upload directory and the rules for what may live in it.
pub struct MediaStore {
    dir: PathBuf,
    extensions: Vec<String>,
    event_bus: Arc<EventBus>,
}

impl MediaStore {
    pub fn new(config: &MediaConfig, event_bus: Arc<EventBus>) -> Self {
        Self {
            dir: config.upload_dir.clone(),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            event_bus,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the upload directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn accepts(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// Reduce a client-supplied file name to a safe single path component
    /// with an accepted extension.
    pub fn sanitize_name(&self, raw: &str) -> Result<String> {
        // Some clients send a full path; only the last component counts.
        let last = raw.rsplit(&['/', '\\'][..]).next().unwrap_or(raw);
        let name = sanitize_filename::sanitize(last.trim());

        if name.is_empty() || name.starts_with('.') {
            return Err(Error::validation(format!("invalid file name: {raw:?}")));
        }
        if !self.accepts(&name) {
            return Err(Error::validation(format!(
                "unsupported file type: {name} (accepted: {})",
                self.extensions
                    .iter()
                    .map(|e| format!(".{e}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(name)
    }

    /// Map a file name from the listing to its path in the upload directory.
    ///
    /// The name must already be a bare file name; existence is checked when
    /// the stream request is validated.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let bare = Path::new(name)
            .file_name()
            .map(|n| n == std::ffi::OsStr::new(name))
            .unwrap_or(false);
        if !bare || name.starts_with('.') {
            return Err(Error::validation(format!("invalid file name: {name:?}")));
        }
        Ok(self.dir.join(name))
    }

    /// List accepted media files, sorted by name.
    pub async fn list(&self) -> Result<Vec<MediaFile>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !self.accepts(&name) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            files.push(MediaFile {
                name,
                size_bytes: meta.len(),
                modified: meta.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now()),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Begin writing an upload named `raw_name`.
    pub async fn begin_upload(&self, raw_name: &str) -> Result<Upload> {
        let name = self.sanitize_name(raw_name)?;
        self.ensure_dir().await?;

        let target = self.dir.join(&name);
        let part = self
            .dir
            .join(format!(".{name}.{}.part", uuid::Uuid::new_v4().simple()));
        let file = tokio::fs::File::create_new(&part).await?;

        Ok(Upload {
            name,
            part,
            target,
            file,
            written: 0,
        })
    }

    /// Move a finished upload into place, replacing any file of the same name.
    pub async fn commit_upload(&self, upload: Upload) -> Result<MediaFile> {
        let Upload {
            name,
            part,
            target,
            mut file,
            written,
        } = upload;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let replaced = tokio::fs::try_exists(&target).await.unwrap_or(false);
        if let Err(e) = tokio::fs::rename(&part, &target).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e.into());
        }

        tracing::info!(
            file = %name,
            size_bytes = written,
            replaced,
            "Upload stored"
        );
        self.event_bus.broadcast(EventPayload::MediaUploaded {
            file_name: name.clone(),
            size_bytes: written,
        });

        Ok(MediaFile {
            name,
            size_bytes: written,
            modified: Utc::now(),
        })
    }

    /// Discard an unfinished upload.
    pub async fn abort_upload(&self, upload: Upload) {
        let Upload { name, part, file, .. } = upload;
        drop(file);
        if let Err(e) = tokio::fs::remove_file(&part).await {
            tracing::debug!(file = %name, "Failed to remove partial upload: {e}");
        }
    }

    /// Delete a file from the upload directory.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("media file", name));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(file = %name, "Media file deleted");
        self.event_bus.broadcast(EventPayload::MediaDeleted {
            file_name: name.to_string(),
        });
        Ok(())
    }

    /// Delete every regular file whose modification time is more than
    /// `max_age` in the past. Returns the names removed.
    ///
    /// A file that cannot be inspected or removed is logged and skipped.
    pub async fn sweep(&self, max_age: Duration) -> Result<Vec<String>> {
        let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
            return Ok(Vec::new());
        };

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let modified = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta.modified(),
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(file = %name, "Failed to stat during sweep: {e}");
                    continue;
                }
            };

            let expired = match modified {
                Ok(mtime) => mtime < cutoff,
                Err(e) => {
                    tracing::warn!(file = %name, "No modification time: {e}");
                    false
                }
            };
            if !expired {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    tracing::info!(file = %name, "Swept expired file");
                    removed.push(name);
                }
                Err(e) => tracing::warn!(file = %name, "Failed to sweep: {e}"),
            }
        }

        if !removed.is_empty() {
            removed.sort();
            self.event_bus.broadcast(EventPayload::MediaSwept {
                removed: removed.clone(),
            });
        }
        Ok(removed)
    }
}

/// An upload in progress. Finish with [`MediaStore::commit_upload`] or
/// [`MediaStore::abort_upload`].
pub struct Upload {
    name: String,
    part: PathBuf,
    target: PathBuf,
    file: tokio::fs::File,
    written: u64,
}

impl Upload {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> MediaStore {
        let config = MediaConfig {
            upload_dir: dir.to_path_buf(),
            ..MediaConfig::default()
        };
        MediaStore::new(&config, Arc::new(EventBus::default()))
    }

    fn age(path: &Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    async fn upload(store: &MediaStore, name: &str, body: &[u8]) -> MediaFile {
        let mut upload = store.begin_upload(name).await.unwrap();
        upload.write_chunk(body).await.unwrap();
        store.commit_upload(upload).await.unwrap()
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let old = dir.path().join("old.mp4");
        let fresh = dir.path().join("fresh.mp4");
        let stale_part = dir.path().join(".x.mp4.part");
        std::fs::write(&old, b"old").unwrap();
        std::fs::write(&fresh, b"fresh").unwrap();
        std::fs::write(&stale_part, b"partial").unwrap();
        age(&old, Duration::from_secs(25 * 3600));
        age(&fresh, Duration::from_secs(23 * 3600));
        age(&stale_part, Duration::from_secs(48 * 3600));

        let removed = store.sweep(Duration::from_secs(24 * 3600)).await.unwrap();
        assert_eq!(removed, vec![".x.mp4.part", "old.mp4"]);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn sweep_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir.path().join("never-created"));
        assert!(store.sweep(Duration::from_secs(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_leaves_directories_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        assert!(store.sweep(Duration::ZERO).await.unwrap().is_empty());
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn upload_same_name_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        upload(&store, "a.mp4", b"first version").await;
        let second = upload(&store, "a.mp4", b"second").await;
        assert_eq!(second.size_bytes, 6);

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a.mp4");
        assert_eq!(std::fs::read(dir.path().join("a.mp4")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn concurrent_uploads_of_one_name_do_not_mix() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut first = store.begin_upload("a.mp4").await.unwrap();
        let mut second = store.begin_upload("a.mp4").await.unwrap();
        assert_ne!(first.part, second.part);

        first.write_chunk(b"aaaaaaaaaa").await.unwrap();
        second.write_chunk(b"bb").await.unwrap();
        first.write_chunk(b"aaaaaaaaaa").await.unwrap();

        store.commit_upload(second).await.unwrap();
        store.commit_upload(first).await.unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("a.mp4")).unwrap(),
            b"aaaaaaaaaaaaaaaaaaaa"
        );
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn upload_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir.path().join("uploaded_videos"));
        upload(&store, "clip.FLV", b"flv").await;
        assert!(dir.path().join("uploaded_videos/clip.FLV").is_file());
    }

    #[tokio::test]
    async fn upload_rejects_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store.begin_upload("movie.mkv").await.err().unwrap();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains(".mp4, .flv"));
    }

    #[tokio::test]
    async fn aborted_upload_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut pending = store.begin_upload("a.mp4").await.unwrap();
        pending.write_chunk(b"half").await.unwrap();
        store.abort_upload(pending).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn sanitize_strips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert_eq!(store.sanitize_name("../../etc/a.mp4").unwrap(), "a.mp4");
        assert_eq!(store.sanitize_name("C:\\Users\\me\\b.flv").unwrap(), "b.flv");
        assert!(store.sanitize_name(".mp4").is_err());
        assert!(store.sanitize_name("").is_err());
    }

    #[test]
    fn resolve_rejects_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert_eq!(store.resolve("a.mp4").unwrap(), dir.path().join("a.mp4"));
        assert!(store.resolve("../a.mp4").is_err());
        assert!(store.resolve("sub/a.mp4").is_err());
        assert!(store.resolve("..").is_err());
    }

    #[tokio::test]
    async fn list_skips_hidden_and_unaccepted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        std::fs::write(dir.path().join("b.mp4"), b"b").unwrap();
        std::fs::write(dir.path().join("a.flv"), b"a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        std::fs::write(dir.path().join(".c.mp4.part"), b"c").unwrap();

        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["a.flv", "b.mp4"]);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store.delete("gone.mp4").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
