//! ダッシュボード状態
//!
//! 進捗カウンタと結果コレクションを保持する唯一のオーナー。
//! アップロード・ポーラー・ライブ検出はコールバック経由でのみ状態を変更する。
//!
//! 順序の約束:
//! - `is_processing` が false になった後のポーラー書き込みは捨てる
//! - バッチ完了時は `completed_count = expected_count` で上書きする
//! - バッチとライブは同時に進捗を駆動しない

use crate::error::{DashboardError, Result};
use inspection_common::{ActiveView, AnalysisResult, ProgressState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 現在進捗を駆動しているフロー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Idle,
    Batch,
    Live,
}

impl Flow {
    fn label(&self) -> &'static str {
        match self {
            Flow::Idle => "待機",
            Flow::Batch => "バッチ",
            Flow::Live => "ライブ",
        }
    }
}

#[derive(Debug)]
pub struct DashboardController {
    progress: ProgressState,
    results: Vec<AnalysisResult>,
    active_view: ActiveView,
    upload_reset_key: u64,
    flow: Flow,
    live_limit: usize,
    last_error: Option<String>,
}

impl DashboardController {
    pub fn new(live_limit: usize) -> Self {
        Self {
            progress: ProgressState::default(),
            results: Vec::new(),
            active_view: ActiveView::default(),
            upload_reset_key: 0,
            flow: Flow::Idle,
            live_limit: live_limit.max(1),
            last_error: None,
        }
    }

    pub fn on_batch_start(&mut self, count: usize) -> Result<()> {
        if self.flow == Flow::Live {
            return Err(DashboardError::FlowConflict {
                active: Flow::Live.label(),
                requested: Flow::Batch.label(),
            });
        }
        self.progress = ProgressState {
            is_processing: true,
            expected_count: count,
            completed_count: 0,
        };
        self.flow = Flow::Batch;
        self.last_error = None;
        Ok(())
    }

    /// ポーラーからの進捗反映。反映した場合は true
    pub fn on_progress_tick(&mut self, count: usize) -> bool {
        if !self.progress.is_processing || self.flow != Flow::Batch {
            return false;
        }
        let clamped = count.min(self.progress.expected_count);
        if clamped < self.progress.completed_count {
            return false;
        }
        self.progress.completed_count = clamped;
        true
    }

    pub fn on_batch_complete(&mut self, results: Vec<AnalysisResult>) {
        self.results = results;
        self.progress.is_processing = false;
        self.progress.completed_count = self.progress.expected_count;
        self.flow = Flow::Idle;
        self.active_view = ActiveView::Results;
        self.upload_reset_key += 1;
    }

    /// バッチ失敗: 処理中フラグを明示的に下ろし、再試行できる待機状態に戻す
    pub fn on_batch_failed(&mut self, message: impl Into<String>) {
        self.progress.is_processing = false;
        if self.flow == Flow::Batch {
            self.flow = Flow::Idle;
        }
        self.last_error = Some(message.into());
    }

    pub fn on_live_started(&mut self) -> Result<()> {
        if self.flow == Flow::Batch {
            return Err(DashboardError::FlowConflict {
                active: Flow::Batch.label(),
                requested: Flow::Live.label(),
            });
        }
        self.flow = Flow::Live;
        self.progress.is_processing = true;
        self.last_error = None;
        Ok(())
    }

    pub fn on_live_stopped(&mut self) {
        if self.flow == Flow::Live {
            self.flow = Flow::Idle;
            self.progress.is_processing = false;
        }
    }

    /// ライブ結果を先頭に追加（上限を超えた古いものは捨てる）
    ///
    /// `is_processing` は変更しない。バッチ実行中に届いた結果は捨てる。
    pub fn on_live_result(&mut self, result: AnalysisResult) -> bool {
        if self.flow == Flow::Batch {
            return false;
        }
        self.results.insert(0, result);
        self.results.truncate(self.live_limit);
        true
    }

    pub fn report_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// 明示的なリセット（フロー切り替え時）
    pub fn reset(&mut self) {
        self.progress = ProgressState::default();
        self.results.clear();
        self.flow = Flow::Idle;
        self.last_error = None;
        self.upload_reset_key += 1;
    }

    pub fn progress(&self) -> ProgressState {
        self.progress
    }

    pub fn results(&self) -> &[AnalysisResult] {
        &self.results
    }

    pub fn active_view(&self) -> ActiveView {
        self.active_view
    }

    pub fn upload_reset_key(&self) -> u64 {
        self.upload_reset_key
    }

    pub fn flow(&self) -> Flow {
        self.flow
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// 各コンポーネントに配るハンドル
///
/// 変更のたびに進捗を watch チャネルへ流す。
#[derive(Clone)]
pub struct Dashboard {
    inner: Arc<Mutex<DashboardController>>,
    progress_tx: Arc<watch::Sender<ProgressState>>,
}

impl Dashboard {
    pub fn new(live_limit: usize) -> Self {
        let (progress_tx, _) = watch::channel(ProgressState::default());
        Self {
            inner: Arc::new(Mutex::new(DashboardController::new(live_limit))),
            progress_tx: Arc::new(progress_tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DashboardController> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 変更と publish は同じロックの中で行う（publish の順序 = 変更の順序）
    fn update<T>(&self, f: impl FnOnce(&mut DashboardController) -> T) -> T {
        let mut controller = self.lock();
        let value = f(&mut controller);
        self.progress_tx.send_replace(controller.progress());
        value
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressState> {
        self.progress_tx.subscribe()
    }

    pub fn on_batch_start(&self, count: usize) -> Result<()> {
        let outcome = self.update(|c| c.on_batch_start(count));
        if outcome.is_ok() {
            info!(count, "batch started");
        }
        outcome
    }

    pub fn on_progress_tick(&self, count: usize) -> bool {
        let applied = self.update(|c| c.on_progress_tick(count));
        if !applied {
            debug!(count, "progress tick discarded");
        }
        applied
    }

    pub fn on_batch_complete(&self, results: Vec<AnalysisResult>) {
        let count = results.len();
        self.update(|c| c.on_batch_complete(results));
        info!(count, "batch complete");
    }

    pub fn on_batch_failed(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "batch failed");
        self.update(|c| c.on_batch_failed(message));
    }

    pub fn on_live_started(&self) -> Result<()> {
        self.update(|c| c.on_live_started())
    }

    pub fn on_live_stopped(&self) {
        self.update(|c| c.on_live_stopped());
    }

    pub fn on_live_result(&self, result: AnalysisResult) -> bool {
        let id = result.id.to_string();
        let accepted = self.update(|c| c.on_live_result(result));
        if !accepted {
            debug!(%id, "live result dropped during batch flow");
        }
        accepted
    }

    pub fn report_error(&self, message: impl Into<String>) {
        self.update(|c| c.report_error(message));
    }

    pub fn reset(&self) {
        self.update(|c| c.reset());
    }

    pub fn progress(&self) -> ProgressState {
        self.lock().progress()
    }

    pub fn results(&self) -> Vec<AnalysisResult> {
        self.lock().results().to_vec()
    }

    pub fn active_view(&self) -> ActiveView {
        self.lock().active_view()
    }

    pub fn flow(&self) -> Flow {
        self.lock().flow()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inspection_common::{DetailFields, ImageMaterial, ResultId, Verdict};

    fn frame(seq: u64) -> AnalysisResult {
        AnalysisResult {
            id: ResultId::Frame { at_ms: 1_000 + seq as i64, seq },
            name: format!("Frame {}", seq),
            verdict: Verdict::Pass,
            reason: None,
            confidence: 80.0,
            details: DetailFields::new(),
            image: ImageMaterial::default(),
            captured_at: String::new(),
        }
    }

    #[test]
    fn test_batch_start_resets_counters() {
        let mut c = DashboardController::new(5);
        c.on_batch_start(3).unwrap();
        assert_eq!(
            c.progress(),
            ProgressState { is_processing: true, expected_count: 3, completed_count: 0 }
        );
        assert_eq!(c.flow(), Flow::Batch);
    }

    #[test]
    fn test_progress_tick_is_monotonic_and_bounded() {
        let mut c = DashboardController::new(5);
        c.on_batch_start(4).unwrap();
        assert!(c.on_progress_tick(2));
        assert!(!c.on_progress_tick(1));
        assert_eq!(c.progress().completed_count, 2);
        assert!(c.on_progress_tick(9));
        assert_eq!(c.progress().completed_count, 4);
    }

    #[test]
    fn test_complete_overrides_poller_value() {
        let mut c = DashboardController::new(5);
        c.on_batch_start(5).unwrap();
        c.on_progress_tick(2);
        c.on_batch_complete(vec![]);
        let progress = c.progress();
        assert!(!progress.is_processing);
        assert_eq!(progress.completed_count, 5);
        assert_eq!(c.active_view(), ActiveView::Results);
        assert_eq!(c.upload_reset_key(), 1);
    }

    #[test]
    fn test_tick_after_complete_is_discarded() {
        let mut c = DashboardController::new(5);
        c.on_batch_start(5).unwrap();
        c.on_batch_complete(vec![]);
        assert!(!c.on_progress_tick(3));
        assert_eq!(c.progress().completed_count, 5);
    }

    #[test]
    fn test_batch_failed_clears_processing() {
        let mut c = DashboardController::new(5);
        c.on_batch_start(2).unwrap();
        c.on_batch_failed("network");
        assert!(!c.progress().is_processing);
        assert_eq!(c.flow(), Flow::Idle);
        assert_eq!(c.last_error(), Some("network"));
        assert_eq!(c.active_view(), ActiveView::Upload);
    }

    #[test]
    fn test_flows_are_exclusive() {
        let mut c = DashboardController::new(5);
        c.on_live_started().unwrap();
        assert!(matches!(c.on_batch_start(1), Err(DashboardError::FlowConflict { .. })));
        c.on_live_stopped();
        c.on_batch_start(1).unwrap();
        assert!(matches!(c.on_live_started(), Err(DashboardError::FlowConflict { .. })));
    }

    #[test]
    fn test_live_results_are_bounded_newest_first() {
        let mut c = DashboardController::new(5);
        c.on_live_started().unwrap();
        for seq in 1..=7 {
            assert!(c.on_live_result(frame(seq)));
        }
        let names: Vec<&str> = c.results().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Frame 7", "Frame 6", "Frame 5", "Frame 4", "Frame 3"]);
    }

    #[test]
    fn test_live_result_does_not_touch_processing() {
        let mut c = DashboardController::new(5);
        c.on_live_result(frame(1));
        assert!(!c.progress().is_processing);
        c.on_live_started().unwrap();
        c.on_live_result(frame(2));
        assert!(c.progress().is_processing);
    }

    #[test]
    fn test_reset() {
        let mut c = DashboardController::new(5);
        c.on_batch_start(2).unwrap();
        c.reset();
        assert_eq!(c.progress(), ProgressState::default());
        assert_eq!(c.flow(), Flow::Idle);
        assert!(c.results().is_empty());
    }

    #[test]
    fn test_handle_publishes_progress() {
        let dashboard = Dashboard::new(5);
        let rx = dashboard.subscribe();
        dashboard.on_batch_start(3).unwrap();
        assert!(rx.borrow().is_processing);
        dashboard.on_batch_complete(vec![]);
        assert_eq!(*rx.borrow(), ProgressState { is_processing: false, expected_count: 3, completed_count: 3 });
    }

    #[test]
    fn test_published_progress_matches_state_under_contention() {
        for _ in 0..2_000 {
            let dashboard = Dashboard::new(5);
            let rx = dashboard.subscribe();
            dashboard.on_batch_start(5).unwrap();

            let ticker = dashboard.clone();
            let finisher = dashboard.clone();
            let tick = std::thread::spawn(move || {
                ticker.on_progress_tick(2);
            });
            let complete = std::thread::spawn(move || finisher.on_batch_complete(vec![]));
            tick.join().unwrap();
            complete.join().unwrap();

            let published = *rx.borrow();
            assert_eq!(published, dashboard.progress());
            assert_eq!(
                published,
                ProgressState { is_processing: false, expected_count: 5, completed_count: 5 }
            );
        }
    }
}
