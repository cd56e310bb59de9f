//! 検査バックエンドのワイヤ形式
//!
//! レスポンスJSONの受け口と、AnalysisResult への変換（欠損時のフォールバック）を定義する。
//! - 信頼度の欠損 → 0
//! - 理由の欠損 → None（エラーにしない）
//! - 注釈付き画像は `processed_image_b64` → `details.annotated_image` の順に探す

use crate::error::{Error, Result};
use crate::types::{
    clamp_confidence, AnalysisResult, DetailFields, ImageMaterial, ResultId, SourceHandle, Verdict,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// バッチ/フレーム解析の結果1件
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResultEntry {
    pub id: Option<Value>,
    pub filename: String,
    pub status: String,
    pub reason: Option<String>,
    pub confidence: Option<f64>,
    pub timestamp: Option<String>,
    pub details: Option<DetailFields>,
    pub processed_image_b64: Option<String>,
}

impl ResultEntry {
    /// 注釈付き画像（バックエンドが実際に評価した画像）
    pub fn annotated_image(&self) -> Option<String> {
        if let Some(b64) = self.processed_image_b64.as_deref().filter(|s| !s.is_empty()) {
            return Some(b64.to_string());
        }
        self.details
            .as_ref()
            .and_then(|d| d.get("annotated_image"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn backend_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// バッチ結果に変換
    ///
    /// `index` はバックエンドIDが無い場合のフォールバックID。
    pub fn into_batch_result(self, index: usize, staged: Option<SourceHandle>) -> AnalysisResult {
        let id = self
            .backend_id()
            .map(ResultId::Backend)
            .unwrap_or(ResultId::Index(index));
        let annotated = self.annotated_image();
        AnalysisResult {
            id,
            name: self.filename,
            verdict: Verdict::from_status(&self.status),
            reason: self.reason,
            confidence: clamp_confidence(self.confidence.unwrap_or(0.0)),
            details: self.details.unwrap_or_default(),
            image: ImageMaterial {
                annotated,
                live_preview: None,
                staged,
            },
            captured_at: self.timestamp.unwrap_or_default(),
        }
    }

    /// ライブフレームの結果に変換
    ///
    /// IDと表示名はクライアント側で決める（バックエンドIDは使わない）。
    pub fn into_frame_result(
        self,
        id: ResultId,
        name: String,
        live_preview: Option<String>,
        captured_at: String,
    ) -> AnalysisResult {
        let annotated = self.annotated_image();
        AnalysisResult {
            id,
            name,
            verdict: Verdict::from_status(&self.status),
            reason: self.reason,
            confidence: clamp_confidence(self.confidence.unwrap_or(0.0)),
            details: self.details.unwrap_or_default(),
            image: ImageMaterial {
                annotated,
                live_preview,
                staged: None,
            },
            captured_at: self.timestamp.unwrap_or(captured_at),
        }
    }
}

/// `POST /api/analyze-batch` のレスポンス（`{"results": [...]}` または配列そのもの）
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchEnvelope {
    Wrapped { results: Vec<ResultEntry> },
    Bare(Vec<ResultEntry>),
}

/// バッチレスポンスをパース
pub fn parse_batch_response(body: &str) -> Result<Vec<ResultEntry>> {
    let envelope: BatchEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::Parse(format!("batch response: {}", e)))?;
    Ok(match envelope {
        BatchEnvelope::Wrapped { results } => results,
        BatchEnvelope::Bare(results) => results,
    })
}

/// `GET /api/analysis-progress` のレスポンス
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ProgressReply {
    pub completed_count: usize,
    pub total_count: Option<usize>,
    pub is_running: Option<bool>,
}

/// `POST /api/analyze-frame` のレスポンス
#[derive(Debug, Clone)]
pub enum FrameReply {
    /// 同期プロトコル: 判定がそのまま返る
    Direct(ResultEntry),
    /// 投入→ポーリング: 相関トークンが返る
    Started { frame_id: String },
}

/// フレーム投入レスポンスをパース
///
/// `status == "STARTED"` の場合は `frame_id` が必須。
pub fn parse_frame_reply(body: &str) -> Result<FrameReply> {
    let value: Value = serde_json::from_str(body)?;
    let started = value
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.eq_ignore_ascii_case("started"))
        .unwrap_or(false);

    if started {
        let frame_id = match value.get("frame_id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(Error::Parse("STARTED response without frame_id".into())),
        };
        return Ok(FrameReply::Started { frame_id });
    }

    let entry: ResultEntry = serde_json::from_value(value)?;
    Ok(FrameReply::Direct(entry))
}

/// フレーム処理状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameStatus {
    Completed,
    Error,
    NotFound,
    #[serde(other)]
    Pending,
}

impl FrameStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FrameStatus::Pending)
    }
}

/// `GET /api/frame-progress/{frame_id}` のレスポンス
#[derive(Debug, Clone, Deserialize)]
pub struct FrameProgressReply {
    pub status: FrameStatus,
    #[serde(default)]
    pub result: Option<ResultEntry>,
}

/// `GET /api/statistics` のレスポンス
#[derive(Debug, Clone, Default, PartialEq, Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Statistics {
    pub total: u64,
    pub pass: u64,
    pub fail: u64,
    pub pass_rate: f64,
    pub fail_reasons: BTreeMap<String, u64>,
}
