//! Filesystem tools: read, write, list.
//!
//! All three tools are confined to a root directory. Paths are resolved
//! against the root and any path that escapes it is a validation
//! failure, not an I/O error.

use std::path::{Component, Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::traits::{Tool, ToolFailure};

/// Cap on file bytes returned by `fs_read`.
const READ_CAP_BYTES: usize = 128 * 1024;

/// Resolve `relative` against `root`, rejecting escapes.
fn confine(root: &Path, relative: &str) -> Result<PathBuf, ToolFailure> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return Err(ToolFailure::validation(format!(
            "path must be relative to the workspace: {relative}"
        )));
    }
    let mut resolved = root.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ToolFailure::validation(format!(
                    "path may not traverse outside the workspace: {relative}"
                )));
            }
        }
    }
    Ok(resolved)
}

/// Arguments naming a single path.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PathArgs {
    /// Path relative to the workspace root.
    pub path: String,
}

/// Arguments for writing a file.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WriteArgs {
    /// Path relative to the workspace root.
    pub path: String,
    /// Content to write.
    pub content: String,
    /// Append instead of overwrite.
    #[serde(default)]
    pub append: bool,
}

/// One directory listing row.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntryInfo {
    /// Entry name.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// File size in bytes, `0` for directories.
    pub size: u64,
}

/// Reads a file from the confined workspace.
#[derive(Debug, Clone)]
pub struct FsReadTool {
    root: PathBuf,
}

impl FsReadTool {
    /// Create a read tool confined to `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Tool for FsReadTool {
    const NAME: &'static str = "fs_read";
    type Args = PathArgs;
    type Output = String;

    fn description(&self) -> String {
        "Read a text file from the workspace. Large files are truncated.".to_owned()
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, ToolFailure> {
        let path = confine(&self.root, &args.path)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolFailure::execution(format!("read {}: {e}", args.path), false))?;
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        if text.len() > READ_CAP_BYTES {
            let mut cut = READ_CAP_BYTES;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n[file truncated]");
        }
        Ok(text)
    }
}

/// Writes a file inside the confined workspace.
#[derive(Debug, Clone)]
pub struct FsWriteTool {
    root: PathBuf,
}

impl FsWriteTool {
    /// Create a write tool confined to `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Tool for FsWriteTool {
    const NAME: &'static str = "fs_write";
    type Args = WriteArgs;
    type Output = String;

    fn description(&self) -> String {
        "Write or append a text file in the workspace, creating parent directories.".to_owned()
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, ToolFailure> {
        let path = confine(&self.root, &args.path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolFailure::execution(format!("mkdir: {e}"), false))?;
        }
        if args.append {
            let mut existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            existing.push_str(&args.content);
            tokio::fs::write(&path, existing)
                .await
                .map_err(|e| ToolFailure::execution(format!("write {}: {e}", args.path), false))?;
        } else {
            tokio::fs::write(&path, &args.content)
                .await
                .map_err(|e| ToolFailure::execution(format!("write {}: {e}", args.path), false))?;
        }
        Ok(format!("wrote {} bytes to {}", args.content.len(), args.path))
    }

    fn insights(&self, output: &Self::Output) -> Vec<String> {
        vec![output.clone()]
    }
}

/// Lists a directory inside the confined workspace.
#[derive(Debug, Clone)]
pub struct FsListTool {
    root: PathBuf,
}

impl FsListTool {
    /// Create a list tool confined to `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Tool for FsListTool {
    const NAME: &'static str = "fs_list";
    type Args = PathArgs;
    type Output = Vec<DirEntryInfo>;

    fn description(&self) -> String {
        "List a workspace directory: name, kind and size per entry.".to_owned()
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, ToolFailure> {
        let path = confine(&self.root, &args.path)?;
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolFailure::execution(format!("list {}: {e}", args.path), false))?;
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let meta = entry.metadata().await.ok();
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.as_ref().is_some_and(std::fs::Metadata::is_dir),
                size: meta.as_ref().map_or(0, std::fs::Metadata::len),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn insights(&self, output: &Self::Output) -> Vec<String> {
        vec![format!("listed {} entries", output.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let write = FsWriteTool::new(dir.path());
        let read = FsReadTool::new(dir.path());

        write
            .call(WriteArgs {
                path: "notes/hello.txt".to_owned(),
                content: "hi there".to_owned(),
                append: false,
            })
            .await
            .expect("write should succeed");

        let content = read
            .call(PathArgs {
                path: "notes/hello.txt".to_owned(),
            })
            .await
            .expect("read should succeed");
        assert_eq!(content, "hi there");
    }

    #[tokio::test]
    async fn append_extends_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let write = FsWriteTool::new(dir.path());

        for chunk in ["a", "b"] {
            write
                .call(WriteArgs {
                    path: "log.txt".to_owned(),
                    content: chunk.to_owned(),
                    append: true,
                })
                .await
                .expect("append should succeed");
        }

        let read = FsReadTool::new(dir.path());
        let content = read
            .call(PathArgs {
                path: "log.txt".to_owned(),
            })
            .await
            .expect("read should succeed");
        assert_eq!(content, "ab");
    }

    #[tokio::test]
    async fn escapes_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let read = FsReadTool::new(dir.path());

        for path in ["../etc/passwd", "/etc/passwd"] {
            let failure = read
                .call(PathArgs {
                    path: path.to_owned(),
                })
                .await
                .expect_err("escape should be rejected");
            assert_eq!(failure.kind, crate::tool::traits::FailureKind::Validation);
        }
    }

    #[tokio::test]
    async fn list_reports_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "x").expect("seed file");
        std::fs::create_dir(dir.path().join("sub")).expect("seed dir");

        let list = FsListTool::new(dir.path());
        let entries = list
            .call(PathArgs {
                path: ".".to_owned(),
            })
            .await
            .expect("list should succeed");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert!(entries[1].is_dir);
    }
}
