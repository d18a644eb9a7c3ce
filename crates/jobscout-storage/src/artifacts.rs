use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
}

/// Flat-file store for per-run dumps (search configs, scraped listings,
/// per-listing analyses, summaries).
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, relative_path: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative_path)
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// File-name stamp shared by every artifact of a run, e.g. `20260301_080000`.
    pub fn run_stamp(at: DateTime<Utc>) -> String {
        at.format("%Y%m%d_%H%M%S").to_string()
    }

    /// Write bytes through a temp file and an atomic rename; an existing file
    /// at the same path is replaced.
    pub async fn write_bytes(
        &self,
        relative_path: impl AsRef<Path>,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let relative_path = relative_path.as_ref().to_path_buf();
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating artifact directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp artifact file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp artifact file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp artifact file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp artifact {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(StoredArtifact {
            content_hash: Self::sha256_hex(bytes),
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
        })
    }

    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        relative_path: impl AsRef<Path>,
        value: &T,
    ) -> anyhow::Result<StoredArtifact> {
        let relative_path = relative_path.as_ref();
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serializing {}", relative_path.display()))?;
        self.write_bytes(relative_path, &bytes).await
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> anyhow::Result<T> {
        let path = self.root.join(path);
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Most recently modified `<prefix>*.<extension>` file directly under the
    /// store root. Ties on mtime fall back to the lexically greatest name, which
    /// for stamped names is also the newest.
    pub async fn latest_with_prefix(
        &self,
        prefix: &str,
        extension: &str,
    ) -> anyhow::Result<Option<PathBuf>> {
        if !fs::try_exists(&self.root)
            .await
            .with_context(|| format!("checking {}", self.root.display()))?
        {
            return Ok(None);
        }

        let suffix = format!(".{}", extension.trim_start_matches('.'));
        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("reading {}", self.root.display()))?;

        let mut best: Option<(std::time::SystemTime, String, PathBuf)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing {}", self.root.display()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(prefix) || !name.ends_with(&suffix) {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            let candidate = (modified, name, entry.path());
            if best
                .as_ref()
                .map_or(true, |current| (&candidate.0, &candidate.1) > (&current.0, &current.1))
            {
                best = Some(candidate);
            }
        }

        Ok(best.map(|(_, _, path)| path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn artifact_hashing_is_stable() {
        let hash = ArtifactStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn run_stamp_is_sortable() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 5, 9).single().unwrap();
        assert_eq!(ArtifactStore::run_stamp(at), "20260301_080509");
    }

    #[tokio::test]
    async fn json_writes_are_atomic_and_readable() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());

        let first = store
            .write_json("analysis_1/job_1_analysis.json", &serde_json::json!({"score": 7.5}))
            .await
            .expect("first write");
        let second = store
            .write_json("analysis_1/job_1_analysis.json", &serde_json::json!({"score": 8.0}))
            .await
            .expect("overwrite");

        assert_eq!(first.absolute_path, second.absolute_path);
        assert_ne!(first.content_hash, second.content_hash);
        let on_disk = std::fs::read(&second.absolute_path).unwrap();
        assert_eq!(second.byte_size, on_disk.len());
        assert_eq!(second.content_hash, ArtifactStore::sha256_hex(&on_disk));

        let value: serde_json::Value = store
            .read_json("analysis_1/job_1_analysis.json")
            .await
            .expect("read back");
        assert_eq!(value["score"], 8.0);

        let leftovers = std::fs::read_dir(dir.path().join("analysis_1"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn latest_with_prefix_picks_newest_stamp() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        for name in ["jobs_20260101_080000.json", "jobs_20260102_080000.json", "other.json"] {
            store.write_bytes(name, b"{}").await.expect("write");
        }

        let latest = store
            .latest_with_prefix("jobs_", "json")
            .await
            .expect("scan")
            .expect("some file");
        let name = latest.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("jobs_"));

        let missing = ArtifactStore::new(dir.path().join("absent"))
            .latest_with_prefix("jobs_", "json")
            .await
            .expect("scan");
        assert!(missing.is_none());
    }
}
