// Snapshot record layout and persistence.
//
// The record layout (labels, ordering, placeholders) is read by downstream
// tools and must stay byte-compatible.

use std::path::{Path, PathBuf};

use tokwatch_common::{display_time, AccountSnapshot, NOT_AVAILABLE, UNKNOWN_UPDATE};
use tracing::info;

/// File name layout for a capture, one file per account per run.
const FILE_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const SEPARATOR: &str = "----------------------------------------";

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("failed to write snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Render a snapshot as its plain-text record.
pub fn format_snapshot(snapshot: &AccountSnapshot) -> String {
    let mut out = String::new();

    out.push_str(&format!("用户账号: @{}\n", snapshot.account));
    out.push_str(&format!(
        "用户昵称: {}\n",
        snapshot.nickname.as_deref().unwrap_or(NOT_AVAILABLE)
    ));
    out.push_str(&format!(
        "最新更新: {}\n",
        display_time(snapshot.last_update_time.as_ref(), UNKNOWN_UPDATE)
    ));
    out.push_str(&format!(
        "记录时间: {}\n",
        display_time(Some(&snapshot.captured_at), NOT_AVAILABLE)
    ));
    out.push_str(SEPARATOR);
    out.push_str("\n\n");

    for (i, post) in snapshot.posts.iter().enumerate() {
        out.push_str(&format!("--- 视频 {} ---\n", i + 1));
        out.push_str(&format!(
            "是否置顶: {}\n",
            if post.is_pinned { "是" } else { "否" }
        ));
        out.push_str(&format!(
            "发布时间: {}\n",
            display_time(post.publish_time.as_ref(), NOT_AVAILABLE)
        ));
        out.push_str(&format!(
            "播放量: {}\n",
            post.views.as_deref().unwrap_or(NOT_AVAILABLE)
        ));
        out.push_str(&format!(
            "视频地址: {}\n\n",
            post.url.as_deref().unwrap_or(NOT_AVAILABLE)
        ));
    }

    out
}

/// Writes snapshot records under `<logs_dir>/<account>/<timestamp>.txt`.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    logs_dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn snapshot_path(&self, snapshot: &AccountSnapshot) -> PathBuf {
        self.logs_dir
            .join(snapshot.account.handle())
            .join(format!("{}.txt", snapshot.captured_at.format(FILE_TIME_FORMAT)))
    }

    pub async fn write(&self, snapshot: &AccountSnapshot) -> Result<PathBuf, WriteError> {
        let path = self.snapshot_path(snapshot);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| WriteError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(&path, format_snapshot(snapshot))
            .await
            .map_err(|source| WriteError::Io {
                path: path.clone(),
                source,
            })?;

        info!(
            account = snapshot.account.handle(),
            path = %path.display(),
            posts = snapshot.posts.len(),
            "Snapshot saved"
        );
        Ok(path)
    }
}
