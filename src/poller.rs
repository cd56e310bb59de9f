//! バッチ進捗ポーラー
//!
//! Idle → Polling → (Completed | Failed | Cancelled)
//!
//! バッチ処理中（`is_processing` かつ `expected_count > 0`）だけ
//! 一定間隔で完了件数を問い合わせ、ダッシュボードへ反映する。
//! 失敗時は再試行しない（バッチリクエスト自身の完了/失敗が最終的な結果になる）。

use crate::backend::InspectionBackend;
use crate::dashboard::Dashboard;
use inspection_common::ProgressState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Completed,
    Failed,
    Cancelled,
}

/// 実行中のポーリングサイクル
///
/// 破棄されるとタイマーも止まる。
#[derive(Debug)]
pub struct PollerHandle {
    task: Option<JoinHandle<PollerState>>,
}

impl PollerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// 実行中なら Polling。終了後の結果は `join` で受け取る
    pub fn state(&self) -> PollerState {
        if self.is_finished() {
            PollerState::Idle
        } else {
            PollerState::Polling
        }
    }

    /// タイマーを止める。以後の副作用はない
    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// 終了を待って最終状態を返す
    pub async fn join(mut self) -> PollerState {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(PollerState::Cancelled),
            None => PollerState::Idle,
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct ProgressPoller;

impl ProgressPoller {
    /// ポーリングを開始する
    ///
    /// 処理中でない、または件数が未確定(0)の場合は何もせず None を返す。
    pub fn spawn<B>(backend: Arc<B>, dashboard: Dashboard, interval: Duration) -> Option<PollerHandle>
    where
        B: InspectionBackend + ?Sized + 'static,
    {
        let progress_rx = dashboard.subscribe();
        let progress = dashboard.progress();
        if !progress.is_processing || progress.expected_count == 0 {
            return None;
        }
        let task = tokio::spawn(run(
            backend,
            dashboard,
            progress_rx,
            progress.expected_count,
            interval,
        ));
        Some(PollerHandle { task: Some(task) })
    }
}

async fn run<B>(
    backend: Arc<B>,
    dashboard: Dashboard,
    mut progress_rx: watch::Receiver<ProgressState>,
    expected: usize,
    interval: Duration,
) -> PollerState
where
    B: InspectionBackend + ?Sized,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 最初の tick は即時に返るので読み捨てる
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            changed = progress_rx.changed() => {
                let processing = changed.is_ok() && progress_rx.borrow_and_update().is_processing;
                if !processing {
                    debug!("progress poller cancelled");
                    return PollerState::Cancelled;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }
        if !dashboard.progress().is_processing {
            return PollerState::Cancelled;
        }

        let request = backend.analysis_progress();
        tokio::pin!(request);
        let reply = loop {
            tokio::select! {
                biased;
                changed = progress_rx.changed() => {
                    let processing = changed.is_ok() && progress_rx.borrow_and_update().is_processing;
                    if !processing {
                        debug!("progress poller cancelled during request");
                        return PollerState::Cancelled;
                    }
                }
                reply = &mut request => break reply,
            }
        };

        match reply {
            Ok(reply) => {
                if !dashboard.progress().is_processing {
                    return PollerState::Cancelled;
                }
                dashboard.on_progress_tick(reply.completed_count);
                debug!(completed = reply.completed_count, expected, "progress tick");
                if reply.completed_count >= expected {
                    return PollerState::Completed;
                }
            }
            Err(e) => {
                warn!(error = %e, "progress query failed; poller stopped");
                return PollerState::Failed;
            }
        }
    }
}
