//! Finding the downloaded video and naming its storage object.

mod locate;

pub use locate::{list_bounded, locate_video, LocatedArtifact, LISTING_LIMIT};

use std::path::{Path, PathBuf};

use thiserror::Error;

/// File extensions treated as playable video, lowercase.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "ts", "m2ts", "webm", "mpg", "mpeg",
];

/// Extension used when the file has none.
pub const DEFAULT_EXTENSION: &str = "mp4";

/// Errors while locating the artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(
        "No video file found in {}; intermediate dir: [{}]; main dir: [{}]",
        .searched.display(),
        .intermediate.join(", "),
        .other.join(", ")
    )]
    NotFound {
        searched: PathBuf,
        intermediate: Vec<String>,
        other: Vec<String>,
    },

    #[error("I/O error scanning {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether `path` has one of the video extensions (case-insensitive).
pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            VIDEO_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Lowercased extension of `path`, or the default.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Storage key: `<prefix>/<job_id>/<stem>.<ext>`.
pub fn object_key(prefix: &str, job_id: &str, stem: &str, path: &Path) -> String {
    let file_name = format!("{}.{}", stem, extension_of(path));
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", job_id, file_name)
    } else {
        format!("{}/{}/{}", prefix, job_id, file_name)
    }
}

/// MIME type for an extension (without the dot).
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mkv" => "video/x-matroska",
        "mp4" | "m4v" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "ts" | "m2ts" => "video/mp2t",
        "webm" => "video/webm",
        "mpg" | "mpeg" => "video/mpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_video() {
        assert!(is_video(Path::new("/d/movie.mkv")));
        assert!(is_video(Path::new("/d/MOVIE.MP4")));
        assert!(is_video(Path::new("clip.m2ts")));
        assert!(!is_video(Path::new("/d/movie.part.rar")));
        assert!(!is_video(Path::new("/d/movie.nfo")));
        assert!(!is_video(Path::new("/d/mkv")));
    }

    #[test]
    fn test_object_key() {
        assert_eq!(
            object_key("movies", "job-1", "movie", Path::new("/d/The.Matrix.MKV")),
            "movies/job-1/movie.mkv"
        );
        assert_eq!(
            object_key("", "job-1", "movie", Path::new("/d/film")),
            "job-1/movie.mp4"
        );
        assert_eq!(
            object_key("/media/movies/", "42", "movie", Path::new("a.avi")),
            "media/movies/42/movie.avi"
        );
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("mkv"), "video/x-matroska");
        assert_eq!(content_type_for("MP4"), "video/mp4");
        assert_eq!(content_type_for("bin"), "application/octet-stream");
    }

    #[test]
    fn test_not_found_display() {
        let err = ArtifactError::NotFound {
            searched: PathBuf::from("/downloads/completed"),
            intermediate: vec!["movie.part.rar".to_string()],
            other: vec![],
        };
        assert_eq!(
            err.to_string(),
            "No video file found in /downloads/completed; intermediate dir: [movie.part.rar]; main dir: []"
        );
    }
}
