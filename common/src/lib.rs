//! Inspection Common Library
//!
//! 検査ダッシュボードの共有型とバックエンドとのワイヤ形式

pub mod types;
pub mod wire;
pub mod correlate;
pub mod summary;
pub mod error;

pub use types::{
    ActiveView, AnalysisResult, DetailFields, ImageMaterial, ImageSource, ProgressState, ResultId,
    SourceHandle, Verdict,
};
pub use wire::{
    parse_batch_response, parse_frame_reply, FrameProgressReply, FrameReply, FrameStatus,
    ProgressReply, ResultEntry, Statistics,
};
pub use correlate::correlate_batch;
pub use summary::ResultSummary;
pub use error::{Error, Result};
