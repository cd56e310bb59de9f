use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "inspect-dash")]
#[command(about = "外観検査ダッシュボード（バッチ解析・ライブ検出）", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// バックエンドのURL（設定ファイルより優先）
    #[arg(long, global = true)]
    pub api_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 画像をバッチ送信して判定を表示
    Upload {
        /// 画像ファイルまたはフォルダ（フォルダは直下のみ）
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// 注釈付き画像の保存先
        #[arg(long)]
        save_annotated: Option<PathBuf>,
    },

    /// フォルダの画像をカメラ代わりにライブ検出
    Live {
        /// フレームとして再生する画像フォルダ
        #[arg(required = true)]
        folder: PathBuf,

        /// 記録する結果の数
        #[arg(short = 'n', long, default_value = "5")]
        frames: usize,

        /// 明るさ補正 (-100〜100)
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        brightness: f32,

        /// 露出ゲイン (0.1〜4.0)
        #[arg(long, default_value = "1.0")]
        exposure_gain: f32,

        /// 終了時にプレビューを残す（検出だけ止める）
        #[arg(long)]
        keep_preview: bool,
    },

    /// バックエンドの疎通確認
    Health,

    /// 検査統計を表示
    Stats {
        /// 開始日 (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<String>,

        /// 終了日 (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<String>,
    },

    /// CSVレポートをダウンロード
    Report {
        /// 判定で絞り込み (PASS/FAIL)
        #[arg(long)]
        status: Option<String>,

        /// 開始日 (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<String>,

        /// 終了日 (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<String>,

        /// 保存先ファイルまたはディレクトリ
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 設定を表示/編集
    Config {
        /// バックエンドURLを設定
        #[arg(long)]
        set_api_url: Option<String>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },
}
