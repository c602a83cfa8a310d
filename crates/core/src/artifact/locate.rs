//! Directory scanning.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use super::{is_video, ArtifactError};

/// Entries listed per directory in a not-found diagnostic.
pub const LISTING_LIMIT: usize = 50;

/// The video file chosen for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

/// Entries of `dir` sorted by name. A missing directory is empty.
async fn sorted_entries(dir: &Path) -> Result<Vec<(PathBuf, bool)>, ArtifactError> {
    let io_err = |source| ArtifactError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut reader = match fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(e)),
    };

    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(io_err)? {
        let is_dir = entry.file_type().await.map_err(io_err)?.is_dir();
        entries.push((entry.path(), is_dir));
    }
    entries.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
    Ok(entries)
}

enum Node {
    Dir(PathBuf),
    Video(PathBuf),
}

/// First video file under `root`, depth-first in name order.
async fn first_video(root: &Path) -> Result<Option<PathBuf>, ArtifactError> {
    let mut stack = vec![Node::Dir(root.to_path_buf())];

    while let Some(node) = stack.pop() {
        match node {
            Node::Video(path) => return Ok(Some(path)),
            Node::Dir(dir) => {
                // Reverse so the smallest name is popped first
                for (path, is_dir) in sorted_entries(&dir).await?.into_iter().rev() {
                    if is_dir {
                        stack.push(Node::Dir(path));
                    } else if is_video(&path) {
                        stack.push(Node::Video(path));
                    }
                }
            }
        }
    }

    Ok(None)
}

/// Relative paths under `root`, at most `limit` of them.
pub async fn list_bounded(root: &Path, limit: usize) -> Vec<String> {
    let mut listed = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match sorted_entries(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {}: {}", dir.display(), e);
                continue;
            }
        };

        for (path, is_dir) in entries.into_iter().rev() {
            if is_dir {
                stack.push(path);
            } else if listed.len() < limit {
                let relative = path.strip_prefix(root).unwrap_or(path.as_path());
                listed.push(relative.display().to_string());
            }
        }
        if listed.len() >= limit {
            break;
        }
    }

    listed.sort();
    listed
}

/// Find the downloaded video in `dest_dir`.
///
/// Only `dest_dir` can produce a result. `inter_dir` and `main_dir` are
/// listed for the error message, since partial archives there are what a
/// failed unpack leaves behind.
pub async fn locate_video(
    dest_dir: &Path,
    inter_dir: &Path,
    main_dir: &Path,
) -> Result<LocatedArtifact, ArtifactError> {
    if let Some(path) = first_video(dest_dir).await? {
        let metadata = fs::metadata(&path).await.map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!(path = %path.display(), size = metadata.len(), "Located video file");
        return Ok(LocatedArtifact {
            path,
            file_name,
            size_bytes: metadata.len(),
        });
    }

    debug!(dir = %dest_dir.display(), "No video in destination directory");
    Err(ArtifactError::NotFound {
        searched: dest_dir.to_path_buf(),
        intermediate: list_bounded(inter_dir, LISTING_LIMIT).await,
        other: list_bounded(main_dir, LISTING_LIMIT).await,
    })
}
