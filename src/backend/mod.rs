//! 検査バックエンドとの境界
//!
//! 各エンドポイントを1メソッドとする `InspectionBackend` トレイトと、
//! reqwest による実装 `HttpBackend` を提供する。
//! テストでは同じトレイトを実装したフェイクを差し込む。

mod http;

pub use http::{filename_from_disposition, HttpBackend};

use crate::error::Result;
use async_trait::async_trait;
use inspection_common::{
    FrameProgressReply, FrameReply, ProgressReply, ResultEntry, SourceHandle, Statistics,
};
use serde::Serialize;
use std::time::Duration;

/// 1フレーム分の投入データ
#[derive(Debug, Clone)]
pub struct FrameUpload {
    pub jpeg: Vec<u8>,
    pub brightness: f32,
    pub exposure_gain: f32,
}

/// 統計・レポートの期間指定（YYYY-MM-DD）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// レポートの絞り込み条件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// ダウンロードしたレポート
#[derive(Debug, Clone)]
pub struct ReportFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait InspectionBackend: Send + Sync {
    /// `POST /api/analyze-batch`
    async fn analyze_batch(&self, files: &[SourceHandle]) -> Result<Vec<ResultEntry>>;

    /// `GET /api/analysis-progress`
    async fn analysis_progress(&self) -> Result<ProgressReply>;

    /// `POST /api/analyze-frame`
    async fn analyze_frame(&self, frame: FrameUpload) -> Result<FrameReply>;

    /// `GET /api/frame-progress/{frame_id}`
    async fn frame_progress(&self, frame_id: &str) -> Result<FrameProgressReply>;

    /// `GET /health`（タイムアウト・非2xxはすべて到達不能）
    async fn health(&self, timeout: Duration) -> Result<()>;

    /// `GET /api/statistics`
    async fn statistics(&self, range: &DateRange) -> Result<Statistics>;

    /// `GET /api/report`
    async fn download_report(&self, query: &ReportQuery) -> Result<ReportFile>;
}
