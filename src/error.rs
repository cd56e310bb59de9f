use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("バックエンドに接続できません: {0}")]
    Connectivity(String),

    #[error("バックエンドがエラーを返しました (HTTP {status}): {body}")]
    HttpStatus { status: u16, body: String },

    #[error("レスポンスの解析に失敗: {0}")]
    Decode(String),

    #[error("カメラへのアクセスが拒否されました")]
    Permission,

    #[error("カメラが見つかりません")]
    DeviceNotFound,

    #[error("カメラが他のアプリケーションで使用中です")]
    DeviceBusy,

    #[error("カメラエラー: {0}")]
    Device(String),

    #[error("フレームのエンコードに失敗: {0}")]
    Encode(String),

    #[error("アップロードするファイルがありません")]
    NothingStaged,

    #[error("{active}フローの実行中は{requested}フローを開始できません")]
    FlowConflict {
        active: &'static str,
        requested: &'static str,
    },

    #[error("検出中は撮影パラメータを変更できません")]
    ParamsLocked,

    #[error("撮影パラメータが範囲外です: {0}")]
    InvalidParams(String),

    #[error("不正な状態遷移: {0}")]
    InvalidState(String),

    #[error("フォルダが見つかりません: {0}")]
    FolderNotFound(String),

    #[error("画像が見つかりません: {0}")]
    NoImagesFound(String),

    #[error("JSON解析エラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

impl DashboardError {
    /// 接続系のエラーか（ライブ検出を全停止する対象）
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            DashboardError::Connectivity(_) | DashboardError::HttpStatus { .. }
        )
    }

    /// カメラ取得に関するエラーか
    pub fn is_device(&self) -> bool {
        matches!(
            self,
            DashboardError::Permission
                | DashboardError::DeviceNotFound
                | DashboardError::DeviceBusy
                | DashboardError::Device(_)
        )
    }

    /// 利用者向けメッセージ
    pub fn user_message(&self) -> String {
        match self {
            DashboardError::Permission => {
                "カメラへのアクセス権限が必要です。ブラウザ/OSの設定で許可してください。".to_string()
            }
            DashboardError::DeviceNotFound => {
                "カメラが見つかりません。接続を確認してください。".to_string()
            }
            DashboardError::DeviceBusy => {
                "カメラが他のアプリケーションで使用中です。".to_string()
            }
            DashboardError::Connectivity(_) | DashboardError::HttpStatus { .. } => {
                "解析中にエラーが発生しました。バックエンドサーバーが起動しているか確認してください。"
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<inspection_common::Error> for DashboardError {
    fn from(err: inspection_common::Error) -> Self {
        match err {
            inspection_common::Error::Io(e) => DashboardError::Io(e),
            other => DashboardError::Decode(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for DashboardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DashboardError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            DashboardError::HttpStatus {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            DashboardError::Connectivity(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
