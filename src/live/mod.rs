//! ライブ検出ループ
//!
//! Stopped → StreamPreview → Detecting → Stopped
//! （どの状態からでも回復不能な障害で Errored へ）
//!
//! - カメラストリームはこのループだけが開閉する。同時に開くのは1本まで
//! - 検出開始前にヘルスチェックを行い、失敗してもプレビューは維持する
//! - 一定周期でフレームを切り出して送信する。送信中のフレームが重なってもよい
//! - 1フレームの失敗は握りつぶす。接続エラーだけは検出を全停止する

mod camera;
mod frame;

pub use camera::{
    CameraDevice, CameraStream, FolderCamera, FolderStream, GrabFault, OpenFailure,
    StreamConstraints, SyntheticCamera, SyntheticStream,
};
pub use frame::{data_url, encode_jpeg, preview_filter, CaptureParams, JPEG_QUALITY};

use crate::backend::{FrameUpload, InspectionBackend};
use crate::config::{Config, FrameProtocol};
use crate::dashboard::Dashboard;
use crate::error::{DashboardError, Result};
use chrono::Utc;
use image::RgbImage;
use inspection_common::{FrameReply, FrameStatus, ResultEntry, ResultId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    StreamPreview,
    Detecting,
    /// 利用者向けメッセージ付き
    Errored(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// 検出だけ止めてプレビューは残す
    KeepPreview,
    /// ストリームも閉じる
    Everything,
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub capture_period: Duration,
    pub health_timeout: Duration,
    pub frame_poll: Duration,
    pub frame_timeout: Duration,
    pub protocol: FrameProtocol,
    pub constraints: StreamConstraints,
}

impl LiveConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            capture_period: config.capture_period(),
            health_timeout: config.health_timeout(),
            frame_poll: config.frame_poll_interval(),
            frame_timeout: config.frame_timeout(),
            protocol: config.frame_protocol,
            constraints: StreamConstraints {
                width: config.camera_width,
                height: config.camera_height,
            },
        }
    }
}

impl LiveConfig {
    /// `frames` 件の結果を待つ目安時間（周期 × (frames + 1) + フレームのタイムアウト）
    pub fn run_budget(&self, frames: usize) -> Duration {
        let ticks = u32::try_from(frames).unwrap_or(u32::MAX).saturating_add(1);
        self.capture_period
            .saturating_mul(ticks)
            .saturating_add(self.frame_timeout)
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct Shared<S> {
    state: CaptureState,
    stream: Option<S>,
    /// 検出開始ごとに進む。古いセッションの障害通知を無視するのに使う
    session: u64,
}

fn lock_shared<S>(shared: &Mutex<Shared<S>>) -> MutexGuard<'_, Shared<S>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct LiveCaptureLoop<D: CameraDevice, B: ?Sized> {
    device: D,
    backend: Arc<B>,
    dashboard: Dashboard,
    config: LiveConfig,
    params: CaptureParams,
    shared: Arc<Mutex<Shared<D::Stream>>>,
    ticker: Option<JoinHandle<()>>,
    sequence: Arc<AtomicU64>,
}

impl<D, B> LiveCaptureLoop<D, B>
where
    D: CameraDevice,
    B: InspectionBackend + ?Sized + 'static,
{
    pub fn new(device: D, backend: Arc<B>, dashboard: Dashboard, config: LiveConfig) -> Self {
        Self {
            device,
            backend,
            dashboard,
            config,
            params: CaptureParams::default(),
            shared: Arc::new(Mutex::new(Shared {
                state: CaptureState::Stopped,
                stream: None,
                session: 0,
            })),
            ticker: None,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// カメラを開いてプレビュー状態にする
    pub fn start_preview(&mut self) -> Result<()> {
        let leftover = {
            let mut shared = lock_shared(&self.shared);
            match shared.state {
                CaptureState::StreamPreview => return Ok(()),
                CaptureState::Detecting => {
                    return Err(DashboardError::InvalidState("検出中はプレビューを開き直せません".into()))
                }
                CaptureState::Stopped | CaptureState::Errored(_) => shared.stream.take(),
            }
        };
        if let Some(stream) = leftover {
            stream.release();
        }

        match self.device.open(&self.config.constraints) {
            Ok(stream) => {
                let mut shared = lock_shared(&self.shared);
                shared.stream = Some(stream);
                shared.state = CaptureState::StreamPreview;
                info!("camera preview started");
                Ok(())
            }
            Err(e) => {
                let message = e.user_message();
                warn!(error = %e, "camera open failed");
                lock_shared(&self.shared).state = CaptureState::Errored(message.clone());
                self.dashboard.report_error(message);
                Err(e)
            }
        }
    }

    /// ヘルスチェック後に検出を開始する
    ///
    /// ヘルスチェックに失敗した場合はプレビューのまま接続エラーを返す。
    pub async fn start_detection(&mut self) -> Result<()> {
        self.require_state(&CaptureState::StreamPreview)?;

        let timeout = self.config.health_timeout;
        let checked = match tokio::time::timeout(timeout, self.backend.health(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(DashboardError::Connectivity(format!(
                "ヘルスチェックが {}ms 以内に応答しません",
                timeout.as_millis()
            ))),
        };
        if let Err(e) = checked {
            warn!(error = %e, "health check failed; staying in preview");
            self.dashboard.report_error(e.user_message());
            return Err(e);
        }

        self.require_state(&CaptureState::StreamPreview)?;
        self.dashboard.on_live_started()?;

        let session = {
            let mut shared = lock_shared(&self.shared);
            shared.state = CaptureState::Detecting;
            shared.session += 1;
            shared.session
        };

        let context = Arc::new(FrameContext {
            shared: self.shared.clone(),
            backend: self.backend.clone(),
            dashboard: self.dashboard.clone(),
            params: self.params,
            sequence: self.sequence.clone(),
            frame_number: AtomicU64::new(0),
            session,
            protocol: self.config.protocol,
            frame_poll: self.config.frame_poll,
            frame_timeout: self.config.frame_timeout,
        });
        if let Some(previous) = self.ticker.take() {
            previous.abort();
        }
        self.ticker = Some(tokio::spawn(run_ticker(context, self.config.capture_period)));
        info!(session, period_ms = self.config.capture_period.as_millis() as u64, "live detection started");
        Ok(())
    }

    /// 撮影パラメータを設定する（検出中は不可）
    pub fn set_params(&mut self, params: CaptureParams) -> Result<()> {
        if lock_shared(&self.shared).state == CaptureState::Detecting {
            return Err(DashboardError::ParamsLocked);
        }
        self.params = params;
        Ok(())
    }

    pub fn params(&self) -> CaptureParams {
        self.params
    }

    /// プレビュー表示用のフレーム（表示フィルタ適用済み）
    pub fn preview_frame(&self) -> Result<Option<RgbImage>> {
        let mut shared = lock_shared(&self.shared);
        let Some(stream) = shared.stream.as_mut() else {
            return Ok(None);
        };
        let frame = stream.grab()?;
        Ok(Some(preview_filter(&frame, &self.params)))
    }

    fn require_state(&self, expected: &CaptureState) -> Result<()> {
        let shared = lock_shared(&self.shared);
        if &shared.state == expected {
            Ok(())
        } else {
            Err(DashboardError::InvalidState(format!(
                "{:?} ではなく {:?} です",
                expected, shared.state
            )))
        }
    }
}

impl<D, B> LiveCaptureLoop<D, B>
where
    D: CameraDevice,
    B: ?Sized,
{
    pub fn state(&self) -> CaptureState {
        lock_shared(&self.shared).state.clone()
    }

    pub fn has_stream(&self) -> bool {
        lock_shared(&self.shared).stream.is_some()
    }

    fn halt_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    /// 検出を止める
    ///
    /// 送信中のフレームはそれぞれのタイムアウトで終わる。
    pub fn stop(&mut self, mode: StopMode) {
        self.halt_ticker();
        let stream = {
            let mut shared = lock_shared(&self.shared);
            shared.session += 1;
            match mode {
                StopMode::KeepPreview => {
                    if shared.state == CaptureState::Detecting {
                        shared.state = CaptureState::StreamPreview;
                    }
                    None
                }
                StopMode::Everything => {
                    if !matches!(shared.state, CaptureState::Errored(_)) {
                        shared.state = CaptureState::Stopped;
                    }
                    shared.stream.take()
                }
            }
        };
        if let Some(stream) = stream {
            stream.release();
            debug!("camera stream released");
        }
        self.dashboard.on_live_stopped();
        info!(?mode, "live detection stopped");
    }

    /// 状態にかかわらずタイマーとストリームを解放する
    pub fn teardown(&mut self) {
        self.halt_ticker();
        let stream = {
            let mut shared = lock_shared(&self.shared);
            shared.session += 1;
            shared.state = CaptureState::Stopped;
            shared.stream.take()
        };
        if let Some(stream) = stream {
            stream.release();
        }
        self.dashboard.on_live_stopped();
    }
}

impl<D: CameraDevice, B: ?Sized> Drop for LiveCaptureLoop<D, B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// ティッカーと各フレーム送信タスクが共有する文脈
struct FrameContext<S, B: ?Sized> {
    shared: Arc<Mutex<Shared<S>>>,
    backend: Arc<B>,
    dashboard: Dashboard,
    params: CaptureParams,
    /// ID 用の通し番号（ループの寿命を通して一意）
    sequence: Arc<AtomicU64>,
    /// 表示名 `Frame n` の番号（検出開始ごとに 1 から）
    frame_number: AtomicU64,
    session: u64,
    protocol: FrameProtocol,
    frame_poll: Duration,
    frame_timeout: Duration,
}

impl<S, B> FrameContext<S, B>
where
    S: CameraStream,
    B: InspectionBackend + ?Sized,
{
    /// 現セッションで検出中ならフレームを取得する。そうでなければ None
    fn grab(&self) -> Option<Result<RgbImage>> {
        let mut shared = lock_shared(&self.shared);
        if shared.session != self.session || shared.state != CaptureState::Detecting {
            return None;
        }
        Some(match shared.stream.as_mut() {
            Some(stream) => stream.grab(),
            None => Err(DashboardError::InvalidState("ストリームがありません".into())),
        })
    }

    /// フレームを取得して JPEG にする。エンコードはロックの外で行う
    fn capture(&self) -> Option<Result<Vec<u8>>> {
        let frame = match self.grab()? {
            Ok(frame) => frame,
            Err(e) => return Some(Err(e)),
        };
        Some(encode_jpeg(&frame))
    }

    /// 回復不能な障害: ストリームを閉じて Errored にする
    fn fault(&self, err: DashboardError) {
        let message = err.user_message();
        let stream = {
            let mut shared = lock_shared(&self.shared);
            if shared.session != self.session || shared.state != CaptureState::Detecting {
                return;
            }
            shared.state = CaptureState::Errored(message.clone());
            shared.stream.take()
        };
        if let Some(stream) = stream {
            stream.release();
        }
        error!(error = %err, "live detection aborted");
        self.dashboard.on_live_stopped();
        self.dashboard.report_error(message);
    }

    async fn submit(&self, seq: u64, number: u64, jpeg: Vec<u8>) {
        let captured = Utc::now();
        let id = ResultId::Frame {
            at_ms: captured.timestamp_millis(),
            seq,
        };
        let preview = data_url(&jpeg);
        let upload = FrameUpload {
            jpeg,
            brightness: self.params.brightness(),
            exposure_gain: self.params.exposure_gain(),
        };

        match self.resolve(upload).await {
            Ok(Some(entry)) => {
                let result =
                    entry.into_frame_result(id, format!("Frame {}", number), Some(preview), captured.to_rfc3339());
                debug!(seq, number, verdict = %result.verdict, "frame result");
                self.dashboard.on_live_result(result);
            }
            Ok(None) => debug!(seq, "frame gave no result"),
            Err(e) if e.is_connectivity() => self.fault(e),
            Err(e) => warn!(seq, error = %e, "frame analysis failed; skipped"),
        }
    }

    async fn resolve(&self, upload: FrameUpload) -> Result<Option<ResultEntry>> {
        match self.backend.analyze_frame(upload).await? {
            FrameReply::Direct(entry) => Ok(Some(entry)),
            FrameReply::Started { frame_id } => match self.protocol {
                FrameProtocol::SubmitThenPoll => self.await_frame(&frame_id).await,
                FrameProtocol::Synchronous => Err(DashboardError::Decode(format!(
                    "同期プロトコルで相関トークンが返されました: {}",
                    frame_id
                ))),
            },
        }
    }

    /// 終端状態になるまで（最大 frame_timeout）ポーリングする
    async fn await_frame(&self, frame_id: &str) -> Result<Option<ResultEntry>> {
        match tokio::time::timeout(self.frame_timeout, self.poll_frame(frame_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(frame_id, "frame polling timed out; giving up");
                Ok(None)
            }
        }
    }

    async fn poll_frame(&self, frame_id: &str) -> Result<Option<ResultEntry>> {
        loop {
            tokio::time::sleep(self.frame_poll).await;
            let reply = self.backend.frame_progress(frame_id).await?;
            match reply.status {
                FrameStatus::Completed => return Ok(reply.result),
                FrameStatus::Error | FrameStatus::NotFound => {
                    debug!(frame_id, status = ?reply.status, "frame ended without result");
                    return Ok(None);
                }
                FrameStatus::Pending => {}
            }
        }
    }
}

async fn run_ticker<S, B>(context: Arc<FrameContext<S, B>>, period: Duration)
where
    S: CameraStream,
    B: InspectionBackend + ?Sized + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        // 取得（ファイル読み込み・デコードを含む）とエンコードはブロッキングスレッドで行う
        let capture = context.clone();
        let captured = match tokio::task::spawn_blocking(move || capture.capture()).await {
            Ok(captured) => captured,
            Err(e) => Some(Err(DashboardError::Device(format!("フレーム取得が異常終了しました: {}", e)))),
        };
        let jpeg = match captured {
            None => return,
            Some(Ok(jpeg)) => jpeg,
            Some(Err(e)) => {
                context.fault(e);
                return;
            }
        };

        let seq = context.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let number = context.frame_number.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(seq, number, bytes = jpeg.len(), "frame captured");
        let task_context = context.clone();
        tokio::spawn(async move { task_context.submit(seq, number, jpeg).await });
    }
}
