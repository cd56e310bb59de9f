use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use inspection_common::{AnalysisResult, ProgressState, ResultSummary};
use inspection_dashboard::cli::{Cli, Commands};
use inspection_dashboard::live::FolderCamera;
use inspection_dashboard::{
    report, scanner, BatchOutcome, CaptureParams, CaptureState, Config, Dashboard, DashboardError, HttpBackend,
    InspectionBackend, LiveCaptureLoop, LiveConfig, SelectedFile, StopMode, UploadSession,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "INSPECT_LOG";

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load().context("設定の読み込みに失敗")?;
    if let Some(url) = &cli.api_url {
        config.base_url = url.trim().trim_end_matches('/').to_string();
        config.validate()?;
    }

    match cli.command {
        Commands::Upload { paths, save_annotated } => {
            run_upload(&config, &paths, save_annotated.as_deref()).await?;
        }

        Commands::Live { folder, frames, brightness, exposure_gain, keep_preview } => {
            let params = CaptureParams::new(brightness, exposure_gain)?;
            let stop_mode = if keep_preview { StopMode::KeepPreview } else { StopMode::Everything };
            run_live(&config, &folder, frames.max(1), params, stop_mode).await?;
        }

        Commands::Health => {
            let backend = HttpBackend::new(&config)?;
            println!("🔍 {} に接続中...", backend.base_url());
            match backend.health(config.health_timeout()).await {
                Ok(()) => println!("✅ バックエンドは稼働中です"),
                Err(e) => bail!("{}", e),
            }
        }

        Commands::Stats { start_date, end_date } => {
            let range = report::date_range(start_date, end_date)?;
            let backend = HttpBackend::new(&config)?;
            let stats = backend
                .statistics(&range)
                .await
                .context("統計の取得に失敗")?;
            println!("📊 検査統計\n");
            print!("{}", report::format_statistics(&stats));
        }

        Commands::Report { status, start_date, end_date, output } => {
            let query = report::report_query(status, start_date, end_date)?;
            let backend = HttpBackend::new(&config)?;
            println!("📄 レポートをダウンロード中...");
            let file = backend
                .download_report(&query)
                .await
                .context("レポートの取得に失敗")?;
            let path = report::save_report(&file, output.as_deref())?;
            println!("✔ レポートを保存: {} ({} bytes)", path.display(), file.bytes.len());
        }

        Commands::Config { set_api_url, show } => {
            if let Some(url) = set_api_url {
                config.set_base_url(url)?;
                println!("✔ バックエンドURLを設定しました");
            }

            if show {
                println!("設定:");
                println!("  バックエンドURL: {}", config.base_url);
                println!("  フレーム送信方式: {:?}", config.frame_protocol);
                println!("  進捗ポーリング間隔: {}ms", config.progress_poll_ms);
                println!("  撮影周期: {}ms", config.capture_period_ms);
                println!("  ライブ結果の保持数: {}", config.live_result_limit);
                println!("  カメラ解像度: {}x{}", config.camera_width, config.camera_height);
            }
        }
    }

    Ok(())
}

async fn run_upload(config: &Config, paths: &[PathBuf], save_annotated: Option<&Path>) -> Result<()> {
    println!("📤 inspect-dash - バッチ解析\n");

    // 1. 読み込み
    println!("[1/3] 画像を読み込み中...");
    let files = scanner::collect_inputs(paths)?;
    let mut selected = Vec::with_capacity(files.len());
    for path in &files {
        selected.push(SelectedFile::read(path).await?);
    }

    let backend = Arc::new(HttpBackend::new(config)?);
    let dashboard = Dashboard::new(config.live_result_limit);
    let mut session = UploadSession::new(backend, dashboard.clone(), config.progress_poll_interval());
    let staged = session.stage(selected);
    println!("✔ {}件のファイルをステージ\n", staged);

    // 2. 送信
    println!("[2/3] 解析中...");
    let bar = ProgressBar::new(staged as u64);
    bar.set_style(ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")?.progress_chars("=>-"));
    let watcher = follow_progress(dashboard.subscribe(), bar.clone());

    let outcome = session.submit_batch().await;
    watcher.abort();
    let progress = dashboard.progress();
    bar.set_position(progress.completed_count as u64);

    match outcome {
        Ok(BatchOutcome::Completed { results }) => {
            bar.finish_with_message(progress.status_line());
            println!("✔ 解析完了（{}件）\n", results);
        }
        Ok(BatchOutcome::Skipped) => {
            bar.finish_and_clear();
            return Err(DashboardError::NothingStaged.into());
        }
        Err(e) => {
            bar.abandon_with_message("失敗");
            bail!("{}", e.user_message());
        }
    }

    // 3. 結果
    println!("[3/3] 結果");
    let results = dashboard.results();
    for result in &results {
        print_result(result);
    }
    print_summary(&ResultSummary::from_results(&results));

    if let Some(dir) = save_annotated {
        let written = report::save_annotated_images(&results, dir)?;
        println!("✔ 注釈付き画像を{}枚保存: {}", written, dir.display());
    }

    println!("\n✅ 完了");
    Ok(())
}

/// ダッシュボードの進捗をプログレスバーに映す
fn follow_progress(mut progress_rx: watch::Receiver<ProgressState>, bar: ProgressBar) -> JoinHandle<()> {
    tokio::spawn(async move {
        while progress_rx.changed().await.is_ok() {
            let progress = *progress_rx.borrow_and_update();
            bar.set_length(progress.expected_count as u64);
            bar.set_position(progress.completed_count as u64);
            bar.set_message(progress.status_line());
            if !progress.is_processing {
                break;
            }
        }
    })
}

async fn run_live(
    config: &Config,
    folder: &Path,
    frames: usize,
    params: CaptureParams,
    stop_mode: StopMode,
) -> Result<()> {
    println!("🎥 inspect-dash - ライブ検出\n");

    // 1. カメラ
    let camera = FolderCamera::new(folder)?;
    println!("[1/3] カメラを開いています...（{}枚のフレームを再生）", camera.frame_count());
    let backend = Arc::new(HttpBackend::new(config)?);
    let dashboard = Dashboard::new(config.live_result_limit);
    let live_config = LiveConfig::from_config(config);
    let budget = live_config.run_budget(frames);
    let mut live = LiveCaptureLoop::new(camera, backend, dashboard.clone(), live_config);
    live.set_params(params)?;
    if let Err(e) = live.start_preview() {
        bail!("{}", e.user_message());
    }
    println!("✔ プレビュー開始\n");

    // 2. 検出
    println!("[2/3] ヘルスチェック後に検出を開始...");
    if let Err(e) = live.start_detection().await {
        live.stop(StopMode::Everything);
        bail!("{}", e.user_message());
    }
    println!("✔ 検出中（{}件記録するまで）\n", frames);

    let deadline = Instant::now().checked_add(budget);
    let mut seen = HashSet::new();
    let mut check = tokio::time::interval(Duration::from_millis(200));
    while seen.len() < frames {
        check.tick().await;
        // 古い順に表示
        for result in dashboard.results().iter().rev() {
            if seen.insert(result.id.to_string()) {
                print_result(result);
            }
        }
        if let CaptureState::Errored(message) = live.state() {
            live.teardown();
            bail!("{}", message);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            println!("⚠ 時間内に{}件の結果が揃いませんでした", frames);
            break;
        }
    }

    // 3. 停止
    println!("\n[3/3] 停止中...");
    live.stop(stop_mode);
    println!("✔ カメラ状態: {:?}", live.state());
    print_summary(&ResultSummary::from_results(&dashboard.results()));

    println!("\n✅ 完了");
    Ok(())
}

fn print_result(result: &AnalysisResult) {
    let mark = if result.is_pass() { "✔" } else { "✘" };
    println!(
        "  {} {:<28} {:<4} {:>5.1}%  {}",
        mark,
        result.name,
        result.verdict,
        result.confidence,
        result.reason.as_deref().unwrap_or("")
    );
}

fn print_summary(summary: &ResultSummary) {
    println!(
        "\n合計: {}  合格: {}  不合格: {}  合格率: {}%",
        summary.total, summary.pass, summary.fail, summary.pass_rate
    );
    for (reason, count) in summary.top_fail_reasons() {
        println!("  {:>3}  {}", count, reason);
    }
}
