//! Broadcast highlight assembly.
//!
//! Turns a declarative rundown (clip references with word-level
//! commentary selections, inning transitions, an optional title card)
//! into one finished MP4: transcribe, reduce selections to intervals,
//! cut frame-accurately, and join with audio-aware dissolves. In the
//! synced-narration variant, generated narration is overlaid on ducked
//! original audio around each clip's action peak instead.

pub mod config;
pub mod error;
pub mod fetch;
pub mod media;
pub mod models;
pub mod narration;
pub mod pipeline;
pub mod reduce;
pub mod surgeon;
pub mod timeline;
pub mod transcript;
pub mod transitions;

pub use config::Config;
pub use error::{Result, SupercutError};
pub use pipeline::{AssembleOptions, AssembleReport, Pipeline};
