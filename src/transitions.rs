//! Pre-rendered inning-transition lookup.
//!
//! Transitions live on disk as `{top|bot}-{1..9}.mp4` under a configured
//! directory. A missing file is not an error — the pipeline proceeds
//! without the graphic and reports the skip.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::models::TransitionKey;

/// Resolve a transition key to its local file, or `None` when the
/// graphic is absent.
pub fn resolve(transitions_dir: &Path, key: TransitionKey) -> Option<PathBuf> {
    let path = transitions_dir.join(format!("{}.mp4", key.file_stem()));
    if path.is_file() {
        Some(path)
    } else {
        warn!("transition graphic {} not found at {}", key, path.display());
        None
    }
}
