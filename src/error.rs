//! Crate-wide error taxonomy.
//!
//! Two classes matter to the pipeline: *per-clip recoverable* errors
//! (fetch, transcription, or surgery failures; the clip is dropped with a
//! warning as long as at least one other clip survives) and *fatal*
//! errors (validation, assembly, cancellation, invariant violations; the
//! run is abandoned and the working directory deleted).

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage that invoked the external media tool, for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaStage {
    Probe,
    Trim,
    Concat,
    FilterGraph,
    AudioExtract,
}

impl std::fmt::Display for MediaStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MediaStage::Probe => "probe",
            MediaStage::Trim => "trim",
            MediaStage::Concat => "concat",
            MediaStage::FilterGraph => "filter-graph",
            MediaStage::AudioExtract => "audio-extract",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SupercutError {
    /// Malformed rundown, selection out of range, unknown transition key.
    #[error("invalid rundown: {0}")]
    Validation(String),

    /// Transport-level failure while fetching an asset or talking to a provider.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The upstream media host answered with an error status.
    #[error("upstream rejected request with status {status}")]
    UpstreamRejected { status: u16 },

    /// Both transcription providers failed for this source.
    #[error("transcription unavailable for {source_url}")]
    TranscriptionUnavailable { source_url: String },

    /// The media tool could not read the input at all.
    #[error("unreadable media at {}: {detail}", path.display())]
    MediaCorrupt { path: PathBuf, detail: String },

    /// The media tool exited non-zero; carries the tail of its stderr.
    #[error("media tool failed during {stage} (exit {exit_code:?}): {stderr_tail}")]
    MediaFailure {
        stage: MediaStage,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// The run was cancelled by the caller. Non-error outcome: the result
    /// is discarded and the working directory deleted.
    #[error("run cancelled")]
    Cancelled,

    /// A guarded internal invariant was violated (e.g. a segment index
    /// referring to a segment that no longer exists).
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SupercutError {
    /// Whether the pipeline may drop the affected clip and continue.
    ///
    /// Media failures are recoverable at the surgery stage only; the
    /// assembler maps its own failures to fatal before propagating.
    pub fn is_per_clip_recoverable(&self) -> bool {
        matches!(
            self,
            SupercutError::Network(_)
                | SupercutError::UpstreamRejected { .. }
                | SupercutError::TranscriptionUnavailable { .. }
                | SupercutError::MediaCorrupt { .. }
                | SupercutError::MediaFailure { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SupercutError>;
