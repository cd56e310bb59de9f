//! 検査結果の型定義
//!
//! バッチ解析とライブ検出で共有される型:
//! - Verdict: PASS/FAIL 判定
//! - AnalysisResult: 1画像（1フレーム）分の検査結果
//! - ImageMaterial: 結果に紐づく画像ソース
//! - ProgressState: バッチ進捗カウンタ

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// 検査判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        }
    }

    /// バックエンドのステータス文字列を判定に変換
    ///
    /// PASS 以外（FAIL / ERROR / 未知の値）はすべて FAIL として扱う。
    pub fn from_status(status: &str) -> Self {
        if status.trim().eq_ignore_ascii_case("pass") {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// 詳細フィールド（スキーマはバックエンド定義、そのまま素通しする）
pub type DetailFields = Map<String, Value>;

/// 結果ID
///
/// 結果コレクション内で一意。バリアントが異なれば値が同じでも衝突しない。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultId {
    /// バックエンドが採番したID
    Backend(String),
    /// バッチ内の位置（IDが返らなかった場合）
    Index(usize),
    /// ライブフレーム: 取得時刻(ms) + シーケンス番号
    Frame { at_ms: i64, seq: u64 },
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultId::Backend(id) => write!(f, "{}", id),
            ResultId::Index(index) => write!(f, "batch-{}", index),
            ResultId::Frame { at_ms, seq } => write!(f, "frame-{}-{}", at_ms, seq),
        }
    }
}

impl Serialize for ResultId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// ステージされたファイルの実体（共有バイト列）
///
/// プレビューハンドルとは別物。結果はこちらを保持するので
/// アップロード画面がリセットされても画像を参照できる。
#[derive(Clone)]
pub struct SourceHandle {
    name: String,
    bytes: Arc<[u8]>,
}

impl SourceHandle {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 拡張子からMIMEタイプを推定（不明な場合は application/octet-stream）
    pub fn mime_type(&self) -> &'static str {
        let ext = self
            .name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "bmp" => "image/bmp",
            "webp" => "image/webp",
            "gif" => "image/gif",
            _ => "application/octet-stream",
        }
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// 結果に紐づく画像
///
/// 複数ある場合の優先順位: 注釈付き画像 → ライブプレビュー → ステージ済みファイル
#[derive(Debug, Clone, Default)]
pub struct ImageMaterial {
    /// バックエンドが返した注釈付き画像（Base64）
    pub annotated: Option<String>,
    /// ライブ取得したフレームのData URL
    pub live_preview: Option<String>,
    /// アップロード元のファイル
    pub staged: Option<SourceHandle>,
}

/// 表示に使う画像ソース
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
    Annotated(&'a str),
    LivePreview(&'a str),
    Staged(&'a SourceHandle),
}

impl ImageMaterial {
    pub fn preferred(&self) -> Option<ImageSource<'_>> {
        if let Some(b64) = self.annotated.as_deref() {
            return Some(ImageSource::Annotated(b64));
        }
        if let Some(url) = self.live_preview.as_deref() {
            return Some(ImageSource::LivePreview(url));
        }
        self.staged.as_ref().map(ImageSource::Staged)
    }

    pub fn is_empty(&self) -> bool {
        self.annotated.is_none() && self.live_preview.is_none() && self.staged.is_none()
    }
}

/// 検査結果（作成後は変更しない）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub id: ResultId,
    /// 表示名（アップロード時のファイル名、ライブでは "Frame <n>"）
    pub name: String,
    pub verdict: Verdict,
    /// None = 該当なし、Some("") = 理由未記載
    pub reason: Option<String>,
    /// 0〜100
    pub confidence: f64,
    pub details: DetailFields,
    #[serde(skip)]
    pub image: ImageMaterial,
    pub captured_at: String,
}

impl AnalysisResult {
    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// 詳細フィールドの文字列値を取得（例: "product_model"）
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }
}

/// 信頼度を 0〜100 に収める（NaN は 0）
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// バッチ進捗
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub is_processing: bool,
    pub expected_count: usize,
    pub completed_count: usize,
}

impl ProgressState {
    /// 0.0〜1.0 の進捗率
    pub fn fraction(&self) -> f32 {
        if self.expected_count == 0 {
            0.0
        } else {
            (self.completed_count as f32 / self.expected_count as f32).min(1.0)
        }
    }

    /// ステータスバー表示用の文字列
    pub fn status_line(&self) -> String {
        if self.is_processing {
            format!("Processing.... {} / {}", self.completed_count, self.expected_count)
        } else {
            "Ready".to_string()
        }
    }
}

/// ダッシュボードの表示タブ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveView {
    #[default]
    Upload,
    Live,
    Results,
    Summary,
}
