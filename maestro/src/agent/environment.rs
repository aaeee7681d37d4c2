//! Read-only environment snapshot gathering.
//!
//! Collects filesystem metadata about the working directory: project
//! type markers, notable files, version-control state and recent
//! modifications. Never writes anything.

use std::path::Path;
use std::time::SystemTime;

use tracing::debug;

use crate::planner::EnvironmentSnapshot;

/// Files whose presence identifies a project type.
const PROJECT_MARKERS: &[(&str, &str)] = &[
    ("Cargo.toml", "rust"),
    ("package.json", "node"),
    ("pyproject.toml", "python"),
    ("go.mod", "go"),
    ("pom.xml", "java"),
    ("Makefile", "make"),
];

/// Root files worth naming in the snapshot.
const KEY_FILES: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "go.mod",
    "README.md",
    "Dockerfile",
    "Makefile",
    ".env.example",
];

/// How many recently modified files to report.
const RECENT_LIMIT: usize = 8;

/// Gather a snapshot of `working_dir`.
pub async fn gather(working_dir: &Path) -> EnvironmentSnapshot {
    let mut snapshot = EnvironmentSnapshot {
        working_directory: working_dir.display().to_string(),
        project_type: "unknown".to_owned(),
        ..EnvironmentSnapshot::default()
    };

    for (marker, kind) in PROJECT_MARKERS {
        if working_dir.join(marker).exists() {
            snapshot.project_type = (*kind).to_owned();
            break;
        }
    }

    for name in KEY_FILES {
        if working_dir.join(name).exists() {
            snapshot.key_files.push((*name).to_owned());
        }
    }

    let git_dir = working_dir.join(".git");
    if git_dir.exists() {
        snapshot.has_vcs = true;
        snapshot.vcs_branch = read_branch(&git_dir).await;
    }

    snapshot.recently_modified = recently_modified(working_dir).await;
    debug!(
        dir = %snapshot.working_directory,
        project = %snapshot.project_type,
        vcs = snapshot.has_vcs,
        "environment gathered"
    );
    snapshot
}

/// Parse the current branch out of `.git/HEAD`.
async fn read_branch(git_dir: &Path) -> Option<String> {
    let head = tokio::fs::read_to_string(git_dir.join("HEAD")).await.ok()?;
    head.trim()
        .strip_prefix("ref: refs/heads/")
        .map(str::to_owned)
}

/// Top-level files ordered by modification time, newest first.
async fn recently_modified(dir: &Path) -> Vec<String> {
    let Ok(mut reader) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };
    let mut entries: Vec<(String, SystemTime)> = Vec::new();
    while let Ok(Some(entry)) = reader.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if let Ok(meta) = entry.metadata().await {
            if meta.is_file() {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                entries.push((name, modified));
            }
        }
    }
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.truncate(RECENT_LIMIT);
    entries.into_iter().map(|(name, _)| name).collect()
}
