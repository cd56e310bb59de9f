use super::{DateRange, FrameUpload, InspectionBackend, ReportFile, ReportQuery};
use crate::config::Config;
use crate::error::{DashboardError, Result};
use async_trait::async_trait;
use inspection_common::{
    parse_batch_response, parse_frame_reply, FrameProgressReply, FrameReply, ProgressReply,
    ResultEntry, SourceHandle, Statistics,
};
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_REPORT_NAME: &str = "analysis_report.csv";

/// reqwest による検査バックエンドクライアント
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DashboardError::Config(format!("HTTPクライアント初期化失敗: {}", e)))?;
        Ok(Self::with_client(client, &config.base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 2xx 以外は HttpStatus エラーにする
    async fn ensure_success(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DashboardError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.client.get(self.url(path)).send().await?;
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| DashboardError::Decode(format!("{}: {}", path, e)))
    }
}

fn file_part(handle: &SourceHandle) -> Result<Part> {
    Part::bytes(handle.bytes().to_vec())
        .file_name(handle.name().to_string())
        .mime_str(handle.mime_type())
        .map_err(|e| DashboardError::Config(format!("MIMEタイプ設定失敗: {}", e)))
}

#[async_trait]
impl InspectionBackend for HttpBackend {
    #[instrument(name = "backend_analyze_batch", skip_all, fields(files = files.len()))]
    async fn analyze_batch(&self, files: &[SourceHandle]) -> Result<Vec<ResultEntry>> {
        let mut form = Form::new();
        for handle in files {
            form = form.part("files", file_part(handle)?);
        }

        let response = self
            .client
            .post(self.url("/api/analyze-batch"))
            .multipart(form)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        let entries = parse_batch_response(&body)?;
        debug!(results = entries.len(), "batch response decoded");
        Ok(entries)
    }

    async fn analysis_progress(&self) -> Result<ProgressReply> {
        self.get_json("/api/analysis-progress").await
    }

    #[instrument(name = "backend_analyze_frame", skip_all, fields(bytes = frame.jpeg.len()))]
    async fn analyze_frame(&self, frame: FrameUpload) -> Result<FrameReply> {
        let part = Part::bytes(frame.jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| DashboardError::Config(format!("MIMEタイプ設定失敗: {}", e)))?;
        let form = Form::new()
            .part("file", part)
            .text("brightness", frame.brightness.to_string())
            .text("exposure_gain", frame.exposure_gain.to_string());

        let response = self
            .client
            .post(self.url("/api/analyze-frame"))
            .multipart(form)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        Ok(parse_frame_reply(&body)?)
    }

    async fn frame_progress(&self, frame_id: &str) -> Result<FrameProgressReply> {
        self.get_json(&format!("/api/frame-progress/{}", frame_id)).await
    }

    async fn health(&self, timeout: Duration) -> Result<()> {
        let response = self
            .client
            .get(self.url("/health"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DashboardError::Connectivity(format!(
                        "ヘルスチェックが {}ms 以内に応答しません",
                        timeout.as_millis()
                    ))
                } else {
                    DashboardError::Connectivity(e.to_string())
                }
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(DashboardError::Connectivity(format!(
                "ヘルスチェック失敗 (HTTP {})",
                response.status().as_u16()
            )))
        }
    }

    async fn statistics(&self, range: &DateRange) -> Result<Statistics> {
        let response = self
            .client
            .get(self.url("/api/statistics"))
            .query(range)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| DashboardError::Decode(format!("statistics: {}", e)))
    }

    async fn download_report(&self, query: &ReportQuery) -> Result<ReportFile> {
        let response = self
            .client
            .get(self.url("/api/report"))
            .query(query)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| DEFAULT_REPORT_NAME.to_string());
        let bytes = response.bytes().await?.to_vec();

        Ok(ReportFile { file_name, bytes })
    }
}

/// `Content-Disposition` ヘッダからファイル名を取り出す
///
/// パス区切りを含む名前は末尾要素だけを使う。
pub fn filename_from_disposition(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"'))
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name).to_string())
        .filter(|name| !name.is_empty())
}
