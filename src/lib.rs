//! 外観検査ダッシュボード
//!
//! バッチアップロード、進捗ポーリング、ライブ検出の3つの非同期フローが
//! 1つのダッシュボード状態を共有する。状態の変更は `Dashboard` の
//! コールバック経由に限られる。

pub mod backend;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod live;
pub mod poller;
pub mod report;
pub mod scanner;
pub mod upload;

pub use backend::{HttpBackend, InspectionBackend};
pub use config::Config;
pub use dashboard::{Dashboard, DashboardController, Flow};
pub use error::{DashboardError, Result};
pub use live::{CaptureParams, CaptureState, LiveCaptureLoop, LiveConfig, StopMode};
pub use poller::{PollerHandle, PollerState, ProgressPoller};
pub use upload::{BatchOutcome, SelectedFile, UploadSession};
