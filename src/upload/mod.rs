//! アップロードセッション
//!
//! ファイルをステージし、バッチとして送信し、返ってきた結果を
//! ファイル名でステージ済みファイルに紐づける。
//! プレビューハンドルはこのセッションだけが解放する。

mod preview;

pub use preview::{PreviewHandle, PreviewRegistry};

use crate::backend::InspectionBackend;
use crate::dashboard::Dashboard;
use crate::error::{DashboardError, Result};
use crate::poller::{PollerHandle, ProgressPoller};
use inspection_common::{correlate_batch, SourceHandle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// ユーザーが選択したファイル
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DashboardError::Io(std::io::Error::new(
                    e.kind(),
                    format!("ファイルが見つかりません: {}", path.display()),
                ))
            } else {
                DashboardError::Io(e)
            }
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self { name, bytes })
    }
}

/// ステージ済みファイル
#[derive(Debug)]
pub struct StagedFile {
    source: SourceHandle,
    preview: PreviewHandle,
}

impl StagedFile {
    pub fn display_name(&self) -> &str {
        self.source.name()
    }

    pub fn source(&self) -> &SourceHandle {
        &self.source
    }

    pub fn preview_url(&self) -> &str {
        self.preview.url()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// ステージが空だったので何もしていない
    Skipped,
    Completed { results: usize },
}

/// 送信中に future が破棄された場合でも処理中フラグを下ろす
struct InFlightGuard<'a> {
    dashboard: &'a Dashboard,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.dashboard.on_batch_failed("バッチ送信が中断されました");
        }
    }
}

pub struct UploadSession<B: ?Sized> {
    backend: Arc<B>,
    dashboard: Dashboard,
    previews: PreviewRegistry,
    staged: Vec<StagedFile>,
    poll_interval: Duration,
    poller: Option<PollerHandle>,
}

impl<B> UploadSession<B>
where
    B: InspectionBackend + ?Sized + 'static,
{
    pub fn new(backend: Arc<B>, dashboard: Dashboard, poll_interval: Duration) -> Self {
        Self {
            backend,
            dashboard,
            previews: PreviewRegistry::new(),
            staged: Vec::new(),
            poll_interval,
            poller: None,
        }
    }

    /// ファイルをステージする（画像かどうかはバックエンドが判断する）
    pub fn stage(&mut self, files: impl IntoIterator<Item = SelectedFile>) -> usize {
        let before = self.staged.len();
        for file in files {
            let source = SourceHandle::new(file.name, file.bytes);
            let preview = self.previews.create(&source);
            debug!(name = source.name(), preview = preview.url(), "staged");
            self.staged.push(StagedFile { source, preview });
        }
        self.staged.len() - before
    }

    /// 指定位置のファイルを外す。範囲外なら何もしない
    pub fn unstage(&mut self, index: usize) -> bool {
        if index >= self.staged.len() {
            return false;
        }
        let file = self.staged.remove(index);
        self.previews.release(file.preview);
        true
    }

    /// ステージを空にしてプレビューをすべて解放する
    pub fn clear(&mut self) {
        for file in self.staged.drain(..) {
            self.previews.release(file.preview);
        }
    }

    pub fn staged(&self) -> &[StagedFile] {
        &self.staged
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| !p.is_finished())
    }

    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
    }

    /// ステージ済みファイルをバッチ送信する
    ///
    /// 成功時はダッシュボードに結果を渡し、ステージを空にする。
    /// 失敗時は処理中フラグを下ろしてエラーを返す（ステージは残すので再送できる）。
    pub async fn submit_batch(&mut self) -> Result<BatchOutcome> {
        if self.staged.is_empty() {
            return Ok(BatchOutcome::Skipped);
        }

        let count = self.staged.len();
        self.dashboard.on_batch_start(count)?;

        self.stop_poller();
        self.poller =
            ProgressPoller::spawn(self.backend.clone(), self.dashboard.clone(), self.poll_interval);

        let sources: Vec<SourceHandle> = self.staged.iter().map(|f| f.source.clone()).collect();
        info!(count, "submitting batch");

        let dashboard = self.dashboard.clone();
        let guard = InFlightGuard {
            dashboard: &dashboard,
            armed: true,
        };
        let outcome = self.backend.analyze_batch(&sources).await;
        guard.disarm();

        match outcome {
            Ok(entries) => {
                let results = correlate_batch(entries, &sources);
                let received = results.len();
                self.dashboard.on_batch_complete(results);
                self.stop_poller();
                self.clear();
                Ok(BatchOutcome::Completed { results: received })
            }
            Err(e) => {
                self.dashboard.on_batch_failed(e.user_message());
                self.stop_poller();
                Err(e)
            }
        }
    }
}

impl<B: ?Sized> Drop for UploadSession<B> {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        for file in self.staged.drain(..) {
            self.previews.release(file.preview);
        }
    }
}
