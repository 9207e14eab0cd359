//! Input validation and the per-request workspace.
//!
//! Every request gets its own uniquely named directory under
//! [`crate::config::IngestConfig::work_dir`]. The upload, the extracted
//! images and the intermediate JSON all live inside it, so concurrent
//! requests with identical file names never collide.
//!
//! [`Workspace`] is a shared handle: the request and every blocking task
//! working on its files hold a clone, and the directory is removed when the
//! last clone goes away. A cancelled request therefore cannot delete the
//! directory from under a task that is still writing into it.

use crate::error::IngestError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

/// Extensions accepted for upload (compared case-insensitively).
pub const ALLOWED_EXTENSIONS: [&str; 4] = [".pdf", ".png", ".jpg", ".jpeg"];

/// How a file is processed, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
}

impl FileKind {
    /// Classify a file name, or `None` if its extension is not allowed.
    pub fn from_name(name: &str) -> Option<FileKind> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileKind::Pdf),
            "png" | "jpg" | "jpeg" => Some(FileKind::Image),
            _ => None,
        }
    }
}

/// Check whether the file name carries a supported extension.
pub fn allowed_file(name: &str) -> bool {
    FileKind::from_name(name).is_some()
}

/// Classify a file name or fail with a client error.
pub fn file_kind(name: &str) -> Result<FileKind, IngestError> {
    FileKind::from_name(name).ok_or_else(|| IngestError::UnsupportedFileType {
        name: name.to_string(),
    })
}

/// Strip directory components from a client-supplied file name.
///
/// Both `/` and `\` are treated as separators so a Windows-style path from a
/// browser cannot escape the workspace.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        None
    } else {
        Some(last.to_string())
    }
}

/// Scratch directory owned by one request.
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: Arc<TempDir>,
}

impl Workspace {
    /// Create a fresh workspace under `parent`, creating `parent` if needed.
    pub fn create(parent: &Path) -> Result<Self, IngestError> {
        std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        let dir = tempfile::Builder::new()
            .prefix("receipt-intake-")
            .tempdir_in(parent)
            .map_err(|e| IngestError::io(parent, e))?;
        debug!("Created workspace {}", dir.path().display());
        Ok(Self { dir: Arc::new(dir) })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Persist the uploaded bytes and return their path.
    pub async fn stage_upload(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, IngestError> {
        let path = self.dir.path().join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| IngestError::io(&path, e))?;
        debug!("Staged upload {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// Directory for images pulled out of a PDF for QR scanning.
    pub fn images_dir(&self) -> PathBuf {
        self.dir.path().join("images")
    }

    /// Where the OCR stage writes its intermediate JSON.
    pub fn extraction_output(&self, file_name: &str) -> PathBuf {
        self.dir.path().join(format!("temp_{file_name}.json"))
    }

    /// Remove the workspace and everything in it.
    ///
    /// If another clone is still alive, removal is left to the last one.
    pub fn close(self) -> std::io::Result<()> {
        match Arc::try_unwrap(self.dir) {
            Ok(dir) => dir.close(),
            Err(shared) => {
                debug!(
                    "Workspace {} still in use; removed when released",
                    shared.path().display()
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind() {
        assert_eq!(FileKind::from_name("receipt.pdf"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_name("RECEIPT.PDF"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_name("scan.JPeG"), Some(FileKind::Image));
        assert_eq!(FileKind::from_name("scan.png"), Some(FileKind::Image));
        assert_eq!(FileKind::from_name("scan.gif"), None);
        assert_eq!(FileKind::from_name("pdf"), None);
        assert_eq!(FileKind::from_name(""), None);
    }

    #[test]
    fn test_allowed_file() {
        for ext in ALLOWED_EXTENSIONS {
            assert!(allowed_file(&format!("a{ext}")), "{ext}");
        }
        assert!(!allowed_file("a.tiff"));
        assert!(matches!(
            file_kind("a.docx"),
            Err(IngestError::UnsupportedFileType { .. })
        ));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("r.pdf").as_deref(), Some("r.pdf"));
        assert_eq!(sanitize_file_name("../../etc/r.pdf").as_deref(), Some("r.pdf"));
        assert_eq!(sanitize_file_name("C:\\Users\\me\\r.png").as_deref(), Some("r.png"));
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("   "), None);
    }

    #[tokio::test]
    async fn workspace_is_removed_on_close_and_drop() {
        let root = tempfile::tempdir().unwrap();

        let ws = Workspace::create(root.path()).unwrap();
        let staged = ws.stage_upload("r.png", b"not really a png").await.unwrap();
        assert!(staged.exists());
        let dir = ws.path().to_path_buf();
        ws.close().unwrap();
        assert!(!dir.exists());

        let ws = Workspace::create(root.path()).unwrap();
        let dir = ws.path().to_path_buf();
        drop(ws);
        assert!(!dir.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn workspace_outlives_the_request_while_a_task_holds_it() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path()).unwrap();
        let dir = ws.path().to_path_buf();

        let task = ws.clone();
        ws.close().unwrap();
        assert!(dir.exists());

        std::fs::create_dir(task.images_dir()).unwrap();
        drop(task);
        assert!(!dir.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn extraction_output_lives_in_workspace() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path()).unwrap();
        let out = ws.extraction_output("r.pdf");
        assert_eq!(out.parent(), Some(ws.path()));
        assert_eq!(out.file_name().unwrap(), "temp_r.pdf.json");
    }
}
