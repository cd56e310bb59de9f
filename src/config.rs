use crate::error::{DashboardError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 環境変数でベースURLを上書きする
pub const API_URL_ENV: &str = "INSPECT_API_URL";

/// フレーム投入プロトコル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameProtocol {
    /// 1リクエストで判定を受け取る
    Synchronous,
    /// 投入して相関トークンを受け取り、状態をポーリングする
    #[default]
    SubmitThenPoll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub health_timeout_ms: u64,
    pub progress_poll_ms: u64,
    pub capture_period_ms: u64,
    pub frame_poll_ms: u64,
    pub frame_timeout_ms: u64,
    pub live_result_limit: usize,
    pub frame_protocol: FrameProtocol,
    pub camera_width: u32,
    pub camera_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            request_timeout_secs: 60,
            health_timeout_ms: 3_000,
            progress_poll_ms: 1_000,
            capture_period_ms: 1_000,
            frame_poll_ms: 500,
            frame_timeout_ms: 10_000,
            live_result_limit: 5,
            frame_protocol: FrameProtocol::SubmitThenPoll,
            camera_width: 1280,
            camera_height: 800,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)?
        } else {
            Self::default()
        };

        // 環境変数を優先
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                config.base_url = url.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| DashboardError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("inspect-dash").join("config.json"))
    }

    pub fn set_base_url(&mut self, url: String) -> Result<()> {
        self.base_url = url.trim().trim_end_matches('/').to_string();
        self.validate()?;
        self.save()
    }

    pub fn validate(&self) -> Result<()> {
        if reqwest::Url::parse(&self.base_url).is_err() {
            return Err(DashboardError::Config(format!(
                "base_url が不正です: {}",
                self.base_url
            )));
        }
        if !(500..=2_000).contains(&self.progress_poll_ms) {
            return Err(DashboardError::Config(
                "progress_poll_ms は 500〜2000 の範囲で指定してください".into(),
            ));
        }
        if self.frame_poll_ms == 0 || self.frame_poll_ms > 1_000 {
            return Err(DashboardError::Config(
                "frame_poll_ms は 1〜1000 の範囲で指定してください".into(),
            ));
        }
        if self.capture_period_ms == 0 {
            return Err(DashboardError::Config("capture_period_ms は 0 にできません".into()));
        }
        if self.health_timeout_ms == 0 {
            return Err(DashboardError::Config("health_timeout_ms は 0 にできません".into()));
        }
        if self.camera_width == 0 || self.camera_height == 0 {
            return Err(DashboardError::Config(format!(
                "カメラ解像度が不正です: {}x{}",
                self.camera_width, self.camera_height
            )));
        }
        if self.live_result_limit == 0 {
            return Err(DashboardError::Config("live_result_limit は 0 にできません".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn progress_poll_interval(&self) -> Duration {
        Duration::from_millis(self.progress_poll_ms)
    }

    pub fn capture_period(&self) -> Duration {
        Duration::from_millis(self.capture_period_ms)
    }

    pub fn frame_poll_interval(&self) -> Duration {
        Duration::from_millis(self.frame_poll_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}
