//! テスト用のフェイクバックエンド
//!
//! 応答をスクリプトで指定し、呼び出し回数を記録する。

#![allow(dead_code)]

use async_trait::async_trait;
use inspection_common::{
    FrameProgressReply, FrameReply, FrameStatus, ProgressReply, ResultEntry, SourceHandle,
    Statistics,
};
use inspection_dashboard::backend::{
    DateRange, FrameUpload, InspectionBackend, ReportFile, ReportQuery,
};
use inspection_dashboard::error::{DashboardError, Result};
use inspection_dashboard::upload::SelectedFile;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn entry(filename: &str, status: &str) -> ResultEntry {
    ResultEntry {
        filename: filename.to_string(),
        status: status.to_string(),
        confidence: Some(90.0),
        reason: (status != "PASS").then(|| "傷".to_string()),
        ..Default::default()
    }
}

pub fn selected(name: &str) -> SelectedFile {
    SelectedFile::new(name, format!("bytes of {}", name).into_bytes())
}

#[derive(Debug, Clone)]
pub enum BatchScript {
    Results(Vec<ResultEntry>),
    /// staged ファイル名をそのまま PASS で返す
    Echo,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthScript {
    Ok,
    Unreachable,
    /// 応答しない
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameScript {
    /// 同期応答で判定を返す
    Direct,
    /// 相関トークンを返し、`pending` 回 PENDING の後に `terminal` になる
    Started { pending: usize, terminal: Option<FrameStatus> },
    Unreachable,
    /// 1フレームだけの失敗（接続エラーではない）
    Garbled,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub batch: AtomicUsize,
    pub progress: AtomicUsize,
    pub frame: AtomicUsize,
    pub frame_progress: AtomicUsize,
    pub health: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FakeBackend {
    pub calls: Calls,
    batch: Mutex<BatchScript>,
    batch_delay: Mutex<Duration>,
    progress: Mutex<VecDeque<usize>>,
    last_progress: Mutex<usize>,
    progress_fails: Mutex<bool>,
    health: Mutex<HealthScript>,
    frame: Mutex<FrameScript>,
    frame_delays: Mutex<VecDeque<Duration>>,
    frame_polls: Mutex<std::collections::HashMap<String, usize>>,
    pub batch_names: Mutex<Vec<String>>,
    pub frame_params: Mutex<Vec<(f32, f32)>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            calls: Calls::default(),
            batch: Mutex::new(BatchScript::Echo),
            batch_delay: Mutex::new(Duration::ZERO),
            progress: Mutex::new(VecDeque::new()),
            last_progress: Mutex::new(0),
            progress_fails: Mutex::new(false),
            health: Mutex::new(HealthScript::Ok),
            frame: Mutex::new(FrameScript::Direct),
            frame_delays: Mutex::new(VecDeque::new()),
            frame_polls: Mutex::new(Default::default()),
            batch_names: Mutex::new(Vec::new()),
            frame_params: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(self, script: BatchScript) -> Self {
        *self.batch.lock().unwrap() = script;
        self
    }

    pub fn with_batch_delay(self, delay: Duration) -> Self {
        *self.batch_delay.lock().unwrap() = delay;
        self
    }

    /// 進捗応答を順に返す（尽きたら最後の値を繰り返す）
    pub fn with_progress(self, counts: &[usize]) -> Self {
        self.progress.lock().unwrap().extend(counts.iter().copied());
        self
    }

    pub fn with_failing_progress(self) -> Self {
        *self.progress_fails.lock().unwrap() = true;
        self
    }

    pub fn with_health(self, script: HealthScript) -> Self {
        *self.health.lock().unwrap() = script;
        self
    }

    pub fn with_frame(self, script: FrameScript) -> Self {
        *self.frame.lock().unwrap() = script;
        self
    }

    /// フレームごとの応答遅延（先頭から順に使う）
    pub fn with_frame_delays(self, delays: &[Duration]) -> Self {
        self.frame_delays.lock().unwrap().extend(delays.iter().copied());
        self
    }

    pub fn set_frame(&self, script: FrameScript) {
        *self.frame.lock().unwrap() = script;
    }

    pub fn batch_calls(&self) -> usize {
        Calls::get(&self.calls.batch)
    }

    pub fn progress_calls(&self) -> usize {
        Calls::get(&self.calls.progress)
    }

    pub fn frame_calls(&self) -> usize {
        Calls::get(&self.calls.frame)
    }

    pub fn frame_progress_calls(&self) -> usize {
        Calls::get(&self.calls.frame_progress)
    }

    pub fn health_calls(&self) -> usize {
        Calls::get(&self.calls.health)
    }
}

fn unreachable() -> DashboardError {
    DashboardError::Connectivity("connection refused".into())
}

#[async_trait]
impl InspectionBackend for FakeBackend {
    async fn analyze_batch(&self, files: &[SourceHandle]) -> Result<Vec<ResultEntry>> {
        self.calls.batch.fetch_add(1, Ordering::SeqCst);
        *self.batch_names.lock().unwrap() = files.iter().map(|f| f.name().to_string()).collect();

        let delay = *self.batch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let script = self.batch.lock().unwrap().clone();
        match script {
            BatchScript::Results(entries) => Ok(entries),
            BatchScript::Echo => Ok(files.iter().map(|f| entry(f.name(), "PASS")).collect()),
            BatchScript::Unreachable => Err(unreachable()),
        }
    }

    async fn analysis_progress(&self) -> Result<ProgressReply> {
        self.calls.progress.fetch_add(1, Ordering::SeqCst);
        if *self.progress_fails.lock().unwrap() {
            return Err(unreachable());
        }
        let mut last = self.last_progress.lock().unwrap();
        if let Some(next) = self.progress.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(ProgressReply {
            completed_count: *last,
            ..Default::default()
        })
    }

    async fn analyze_frame(&self, frame: FrameUpload) -> Result<FrameReply> {
        let n = self.calls.frame.fetch_add(1, Ordering::SeqCst) + 1;
        self.frame_params
            .lock()
            .unwrap()
            .push((frame.brightness, frame.exposure_gain));

        let delay = self.frame_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay.filter(|d| !d.is_zero()) {
            tokio::time::sleep(delay).await;
        }

        let script = *self.frame.lock().unwrap();
        match script {
            FrameScript::Direct => {
                let mut reply = entry("frame.jpg", if n % 2 == 0 { "FAIL" } else { "PASS" });
                reply.processed_image_b64 = Some(format!("annotated-{}", n));
                Ok(FrameReply::Direct(reply))
            }
            FrameScript::Started { .. } => Ok(FrameReply::Started {
                frame_id: format!("frame-{}", n),
            }),
            FrameScript::Unreachable => Err(unreachable()),
            FrameScript::Garbled => Err(DashboardError::Decode("unexpected body".into())),
        }
    }

    async fn frame_progress(&self, frame_id: &str) -> Result<FrameProgressReply> {
        self.calls.frame_progress.fetch_add(1, Ordering::SeqCst);
        let script = *self.frame.lock().unwrap();
        let FrameScript::Started { pending, terminal } = script else {
            return Err(unreachable());
        };

        let polls = {
            let mut polls = self.frame_polls.lock().unwrap();
            let count = polls.entry(frame_id.to_string()).or_default();
            *count += 1;
            *count
        };

        match terminal {
            Some(status) if polls > pending => Ok(FrameProgressReply {
                status,
                result: (status == FrameStatus::Completed).then(|| entry(frame_id, "PASS")),
            }),
            _ => Ok(FrameProgressReply {
                status: FrameStatus::Pending,
                result: None,
            }),
        }
    }

    async fn health(&self, _timeout: Duration) -> Result<()> {
        self.calls.health.fetch_add(1, Ordering::SeqCst);
        let script = *self.health.lock().unwrap();
        match script {
            HealthScript::Ok => Ok(()),
            HealthScript::Unreachable => Err(unreachable()),
            HealthScript::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn statistics(&self, _range: &DateRange) -> Result<Statistics> {
        Ok(Statistics::default())
    }

    async fn download_report(&self, _query: &ReportQuery) -> Result<ReportFile> {
        Ok(ReportFile {
            file_name: "analysis_report.csv".into(),
            bytes: Vec::new(),
        })
    }
}
