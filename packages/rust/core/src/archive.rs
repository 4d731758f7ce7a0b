//! Source archiving for remote jobs.

use std::path::Path;

use chrono::{DateTime, Local};
use tracing::{info, instrument};

use nbci_discovery::Vcs;
use nbci_shared::Result;
use nbci_storage::{ObjectStore, join_uri};

/// Sub-folder of the staging location that receives source archives.
pub const CODE_ARCHIVES_DIR: &str = "code_archives";

/// Archive file name for a given time, e.g. `source_archived_20240131235959.tar.gz`.
pub fn archive_file_name(now: DateTime<Local>) -> String {
    format!("source_archived_{}.tar.gz", now.format("%Y%m%d%H%M%S"))
}

/// Archive the tracked tree at `HEAD` into `staging_dir` and upload it under
/// `<staging_bucket>/code_archives/`. Returns the uploaded URI.
#[instrument(skip_all, fields(staging = staging_bucket))]
pub async fn archive_code_and_upload(
    vcs: &dyn Vcs,
    store: &dyn ObjectStore,
    staging_dir: &Path,
    staging_bucket: &str,
    now: DateTime<Local>,
) -> Result<String> {
    let file_name = archive_file_name(now);
    let local = staging_dir.join(&file_name);

    vcs.archive_head(&local).await?;

    let dest = join_uri(&join_uri(staging_bucket, CODE_ARCHIVES_DIR), &file_name);
    let uri = store.upload(&local, &dest).await?;

    info!(%uri, "uploaded source code archive");
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn archive_name_uses_timestamp() {
        let now = Local
            .with_ymd_and_hms(2024, 1, 31, 23, 59, 58)
            .single()
            .expect("valid time");
        assert_eq!(archive_file_name(now), "source_archived_20240131235958.tar.gz");
    }
}
