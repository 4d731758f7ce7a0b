//! Object storage for staged notebooks, source archives and executed outputs.
//!
//! Destinations are either local paths or `gs://bucket/object` URIs. The
//! [`RoutingStore`] picks the backend per call: local paths are plain file
//! copies, `gs://` URIs go through `gsutil cp`.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use nbci_shared::{NbciError, Result};

/// URI scheme for Google Cloud Storage locations.
pub const GCS_SCHEME: &str = "gs";

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Where a file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Gcs { bucket: String, object: String },
}

impl Location {
    /// Parse a `gs://` URI, a `file://` URI or a plain path.
    ///
    /// Object names are kept byte for byte; only the bucket is checked.
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(rest) = uri.strip_prefix("gs://") {
            let (bucket, object) = rest.split_once('/').unwrap_or((rest, ""));
            validate_bucket(uri, bucket)?;
            return Ok(Self::Gcs {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        }

        let path = uri.strip_prefix("file://").unwrap_or(uri);
        if path.is_empty() {
            return Err(NbciError::validation("empty storage location"));
        }
        Ok(Self::Local(PathBuf::from(path)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Gcs { .. })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Gcs { bucket, object } => write!(f, "{GCS_SCHEME}://{bucket}/{object}"),
        }
    }
}

/// A bucket must survive as the host of a `gs://` URL unchanged.
fn validate_bucket(uri: &str, bucket: &str) -> Result<()> {
    if bucket.is_empty() {
        return Err(NbciError::validation(format!("GCS URI '{uri}' has no bucket")));
    }
    let url = Url::parse(&format!("{GCS_SCHEME}://{bucket}/"))
        .map_err(|e| NbciError::validation(format!("invalid GCS URI '{uri}': {e}")))?;
    if url.host_str() != Some(bucket) {
        return Err(NbciError::validation(format!(
            "invalid bucket name '{bucket}' in '{uri}'"
        )));
    }
    Ok(())
}

/// Whether `uri` points at Cloud Storage.
pub fn is_gcs_uri(uri: &str) -> bool {
    uri.starts_with("gs://")
}

/// Join a base URI or path with one segment using `/`, without doubling separators.
pub fn join_uri(base: &str, segment: &str) -> String {
    let segment = segment.trim_start_matches('/');
    if base.is_empty() {
        return segment.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), segment)
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// Single-file upload and download.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy `local` to `dest` and return the canonical destination URI.
    async fn upload(&self, local: &Path, dest: &str) -> Result<String>;

    /// Copy `src` to the local path `local`, creating parent directories.
    async fn download(&self, src: &str, local: &Path) -> Result<()>;
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| NbciError::io(parent, e))?;
    }
    Ok(())
}

/// Filesystem-backed store.
#[derive(Debug, Clone, Default)]
pub struct LocalStore;

impl LocalStore {
    fn local_path(uri: &str) -> Result<PathBuf> {
        match Location::parse(uri)? {
            Location::Local(path) => Ok(path),
            gcs @ Location::Gcs { .. } => Err(NbciError::Storage(format!(
                "local store cannot reach {gcs}"
            ))),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn upload(&self, local: &Path, dest: &str) -> Result<String> {
        let dest_path = Self::local_path(dest)?;
        ensure_parent(&dest_path).await?;
        tokio::fs::copy(local, &dest_path)
            .await
            .map_err(|e| NbciError::io(local, e))?;
        debug!(from = %local.display(), to = %dest_path.display(), "copied file");
        Ok(dest_path.display().to_string())
    }

    async fn download(&self, src: &str, local: &Path) -> Result<()> {
        let src_path = Self::local_path(src)?;
        ensure_parent(local).await?;
        tokio::fs::copy(&src_path, local)
            .await
            .map_err(|e| NbciError::io(&src_path, e))?;
        Ok(())
    }
}

/// Cloud Storage store driven by `gsutil cp`.
#[derive(Debug, Clone)]
pub struct GsutilStore {
    program: String,
}

impl GsutilStore {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        debug!(program = %self.program, from, to, "copying object");

        let output = Command::new(&self.program)
            .args(["cp", from, to])
            .output()
            .await
            .map_err(|e| {
                NbciError::Storage(format!(
                    "failed to spawn {}: {e}. Is it installed?",
                    self.program
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NbciError::Storage(format!(
                "{} cp {from} {to}: {}",
                self.program,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Default for GsutilStore {
    fn default() -> Self {
        Self::new("gsutil")
    }
}

#[async_trait]
impl ObjectStore for GsutilStore {
    async fn upload(&self, local: &Path, dest: &str) -> Result<String> {
        let location = Location::parse(dest)?;
        if !location.is_remote() {
            return Err(NbciError::Storage(format!("not a gs:// destination: {dest}")));
        }
        self.copy(&local.to_string_lossy(), dest).await?;
        info!(uri = %location, "uploaded");
        Ok(dest.to_string())
    }

    async fn download(&self, src: &str, local: &Path) -> Result<()> {
        ensure_parent(local).await?;
        self.copy(src, &local.to_string_lossy()).await
    }
}

/// Dispatches to [`GsutilStore`] for `gs://` URIs and [`LocalStore`] otherwise.
#[derive(Debug, Clone, Default)]
pub struct RoutingStore {
    local: LocalStore,
    gcs: GsutilStore,
}

impl RoutingStore {
    pub fn new(gsutil_program: impl Into<String>) -> Self {
        Self {
            local: LocalStore,
            gcs: GsutilStore::new(gsutil_program),
        }
    }

    fn backend(&self, uri: &str) -> &dyn ObjectStore {
        if is_gcs_uri(uri) {
            &self.gcs as &dyn ObjectStore
        } else {
            &self.local
        }
    }
}

#[async_trait]
impl ObjectStore for RoutingStore {
    async fn upload(&self, local: &Path, dest: &str) -> Result<String> {
        self.backend(dest).upload(local, dest).await
    }

    async fn download(&self, src: &str, local: &Path) -> Result<()> {
        self.backend(src).download(src, local).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gcs_uri() {
        let loc = Location::parse("gs://my-bucket/notebooks/out/a.ipynb").expect("parse");
        assert_eq!(
            loc,
            Location::Gcs {
                bucket: "my-bucket".into(),
                object: "notebooks/out/a.ipynb".into()
            }
        );
        assert!(loc.is_remote());
        assert_eq!(loc.to_string(), "gs://my-bucket/notebooks/out/a.ipynb");
    }

    #[test]
    fn gcs_object_names_are_kept_verbatim() {
        for uri in [
            "gs://b/notebooks/my notebook.ipynb",
            "gs://b/notebooks/run#2.ipynb",
            "gs://b/notebooks/q?x=1%20.ipynb",
        ] {
            let loc = Location::parse(uri).expect("parse");
            assert_eq!(loc.to_string(), uri);
        }
        assert_eq!(
            Location::parse("gs://b/dir/run#2.ipynb").expect("parse"),
            Location::Gcs {
                bucket: "b".into(),
                object: "dir/run#2.ipynb".into()
            }
        );
    }

    #[test]
    fn rejects_bad_buckets() {
        assert!(Location::parse("gs:///object").is_err());
        assert!(Location::parse("gs://bad bucket/object").is_err());
    }

    #[tokio::test]
    async fn gsutil_upload_returns_destination_unchanged() {
        let store = GsutilStore::new("true");
        let dest = "gs://b/notebooks/20240101000000_my run#2.ipynb";
        let uri = store.upload(Path::new("x"), dest).await.expect("upload");
        assert_eq!(uri, dest);
    }

    #[test]
    fn parses_local_paths() {
        assert_eq!(
            Location::parse("out/a.ipynb").expect("parse"),
            Location::Local(PathBuf::from("out/a.ipynb"))
        );
        assert_eq!(
            Location::parse("file:///tmp/x").expect("parse"),
            Location::Local(PathBuf::from("/tmp/x"))
        );
        assert!(Location::parse("").is_err());
        assert!(Location::parse("gs://").is_err());
    }

    #[test]
    fn join_uri_normalizes_slashes() {
        assert_eq!(
            join_uri("gs://b/staging/", "/code_archives"),
            "gs://b/staging/code_archives"
        );
        assert_eq!(join_uri("gs://b", "x.ipynb"), "gs://b/x.ipynb");
        assert_eq!(join_uri("", "x"), "x");
    }

    #[tokio::test]
    async fn local_store_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src.txt");
        std::fs::write(&src, "hello").expect("write");

        let store = RoutingStore::default();
        let dest = dir.path().join("a").join("b").join("dst.txt");
        let uri = store
            .upload(&src, &dest.to_string_lossy())
            .await
            .expect("upload");
        assert_eq!(uri, dest.display().to_string());

        let back = dir.path().join("back").join("copy.txt");
        store.download(&uri, &back).await.expect("download");
        assert_eq!(std::fs::read_to_string(back).expect("read"), "hello");
    }

    #[tokio::test]
    async fn local_store_refuses_gcs() {
        let err = LocalStore
            .upload(Path::new("x"), "gs://bucket/x")
            .await
            .unwrap_err();
        assert!(matches!(err, NbciError::Storage(_)));
    }

    #[tokio::test]
    async fn gsutil_missing_program_is_storage_error() {
        let store = GsutilStore::new("nbci-test-no-such-gsutil");
        let err = store
            .upload(Path::new("x"), "gs://bucket/x")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
