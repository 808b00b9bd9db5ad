use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Suffix of the video files picked up by a scan.
pub const VIDEO_EXTENSION: &str = ".mp4";

/// Frame rate used when the caller has no better value.
pub const DEFAULT_VIDEO_FPS: u32 = 30;

/// File names of the videos already uploaded by one writer.
///
/// Keyed by file name only: two directories holding a video with the same
/// name count as one video.
#[derive(Debug, Clone, Default)]
pub struct VideoRegistry {
    seen: HashSet<String>,
}

impl VideoRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, file_name: &str) -> bool {
        self.seen.contains(file_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Records `file_name`. Returns `false` if it was already known.
    pub fn register(&mut self, file_name: &str) -> bool {
        self.seen.insert(file_name.to_string())
    }

    /// Walks `dir` and returns the videos not registered yet, one per file name.
    ///
    /// A missing directory yields nothing. Unreadable entries are skipped.
    #[must_use]
    pub fn scan(&self, dir: &Path) -> Vec<(String, PathBuf)> {
        if !dir.exists() {
            return Vec::new();
        }

        let mut batch = HashSet::new();
        let mut found = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name().into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(VIDEO_EXTENSION) && !self.contains(&name) && batch.insert(name.clone()) {
                found.push((name, entry.into_path()));
            }
        }
        found
    }
}
