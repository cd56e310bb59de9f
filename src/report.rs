//! 統計・レポート出力
//!
//! 期間指定の検証、ダウンロードしたレポートの保存、注釈付き画像の書き出し。

use crate::backend::{DateRange, ReportFile, ReportQuery};
use crate::error::{DashboardError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::NaiveDate;
use inspection_common::{AnalysisResult, Statistics};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

fn parse_date(label: &str, value: Option<String>) -> Result<Option<NaiveDate>> {
    value
        .map(|v| {
            NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").map_err(|_| {
                DashboardError::Config(format!("{} は YYYY-MM-DD 形式で指定してください: {}", label, v))
            })
        })
        .transpose()
}

/// 期間指定を検証する（開始日 ≤ 終了日）
pub fn date_range(start: Option<String>, end: Option<String>) -> Result<DateRange> {
    let start = parse_date("start_date", start)?;
    let end = parse_date("end_date", end)?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(DashboardError::Config(format!(
                "開始日 {} が終了日 {} より後です",
                s, e
            )));
        }
    }
    Ok(DateRange {
        start_date: start.map(|d| d.format("%Y-%m-%d").to_string()),
        end_date: end.map(|d| d.format("%Y-%m-%d").to_string()),
    })
}

/// レポート条件を組み立てる。status は PASS / FAIL のみ
pub fn report_query(
    status: Option<String>,
    start: Option<String>,
    end: Option<String>,
) -> Result<ReportQuery> {
    let status = match status.map(|s| s.trim().to_ascii_uppercase()) {
        None => None,
        Some(s) if s == "PASS" || s == "FAIL" => Some(s),
        Some(other) => {
            return Err(DashboardError::Config(format!(
                "status は PASS か FAIL を指定してください: {}",
                other
            )))
        }
    };
    let range = date_range(start, end)?;
    Ok(ReportQuery {
        status,
        start_date: range.start_date,
        end_date: range.end_date,
    })
}

/// レポートを保存する
///
/// `output` がディレクトリならサーバーが付けたファイル名で、
/// 未指定ならカレントディレクトリに保存する。
pub fn save_report(report: &ReportFile, output: Option<&Path>) -> Result<PathBuf> {
    let path = match output {
        Some(p) if p.is_dir() => p.join(&report.file_name),
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(&report.file_name),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &report.bytes)?;
    Ok(path)
}

/// 統計をテキストに整形
pub fn format_statistics(stats: &Statistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "総数: {}  合格: {}  不合格: {}", stats.total, stats.pass, stats.fail);
    let _ = writeln!(out, "合格率: {:.1}%", stats.pass_rate);

    if !stats.fail_reasons.is_empty() {
        let mut reasons: Vec<(&String, &u64)> = stats.fail_reasons.iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let _ = writeln!(out, "不合格理由:");
        for (reason, count) in reasons {
            let _ = writeln!(out, "  {:>4}  {}", count, reason);
        }
    }
    out
}

fn decode_image_payload(payload: &str) -> Result<Vec<u8>> {
    let b64 = match payload.split_once(";base64,") {
        Some((_, data)) => data,
        None => payload,
    };
    STANDARD
        .decode(b64.trim())
        .map_err(|e| DashboardError::Decode(format!("注釈付き画像: {}", e)))
}

/// 注釈付き画像を `<元ファイル名>_annotated.jpg` として書き出す
///
/// 画像を持たない結果は飛ばす。書き出した枚数を返す。
pub fn save_annotated_images(results: &[AnalysisResult], dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(dir)?;
    let mut written = 0;
    for result in results {
        let Some(payload) = result.image.annotated.as_deref() else {
            continue;
        };
        let bytes = decode_image_payload(payload)?;
        let stem = Path::new(&result.name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| result.id.to_string());
        std::fs::write(dir.join(format!("{}_annotated.jpg", stem)), bytes)?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use inspection_common::{DetailFields, ImageMaterial, ResultId, Verdict};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_date_range_validation() {
        let range = date_range(Some("2025-01-01".into()), Some("2025-01-31".into())).unwrap();
        assert_eq!(range.start_date.as_deref(), Some("2025-01-01"));
        assert_eq!(range.end_date.as_deref(), Some("2025-01-31"));

        assert!(date_range(Some("2025-02-01".into()), Some("2025-01-01".into())).is_err());
        assert!(date_range(Some("01/02/2025".into()), None).is_err());
        assert_eq!(date_range(None, None).unwrap(), DateRange::default());
    }

    #[test]
    fn test_report_query_status() {
        let query = report_query(Some("fail".into()), None, None).unwrap();
        assert_eq!(query.status.as_deref(), Some("FAIL"));
        assert!(report_query(Some("maybe".into()), None, None).is_err());
    }

    #[test]
    fn test_save_report_into_directory() {
        let dir = TempDir::new().unwrap();
        let report = ReportFile {
            file_name: "analysis_report.csv".into(),
            bytes: b"id,status\n1,PASS\n".to_vec(),
        };
        let path = save_report(&report, Some(dir.path())).unwrap();
        assert_eq!(path, dir.path().join("analysis_report.csv"));
        assert_eq!(std::fs::read(&path).unwrap(), report.bytes);

        let explicit = dir.path().join("out").join("custom.csv");
        let path = save_report(&report, Some(&explicit)).unwrap();
        assert_eq!(path, explicit);
        assert!(explicit.exists());
    }

    #[test]
    fn test_format_statistics_orders_reasons() {
        let stats = Statistics {
            total: 10,
            pass: 7,
            fail: 3,
            pass_rate: 70.0,
            fail_reasons: BTreeMap::from([("傷".to_string(), 1), ("汚れ".to_string(), 2)]),
        };
        let text = format_statistics(&stats);
        assert!(text.contains("合格率: 70.0%"));
        let dirt = text.find("汚れ").unwrap();
        let scratch = text.find("傷").unwrap();
        assert!(dirt < scratch);
    }

    #[test]
    fn test_save_annotated_images() {
        let dir = TempDir::new().unwrap();
        let with_image = AnalysisResult {
            id: ResultId::Index(0),
            name: "part_01.png".into(),
            verdict: Verdict::Fail,
            reason: Some("傷".into()),
            confidence: 90.0,
            details: DetailFields::new(),
            image: ImageMaterial {
                annotated: Some(format!("data:image/jpeg;base64,{}", STANDARD.encode([1u8, 2, 3]))),
                ..Default::default()
            },
            captured_at: String::new(),
        };
        let without_image = AnalysisResult {
            id: ResultId::Index(1),
            name: "part_02.png".into(),
            image: ImageMaterial::default(),
            ..with_image.clone()
        };

        let written = save_annotated_images(&[with_image, without_image], dir.path()).unwrap();
        assert_eq!(written, 1);
        assert_eq!(
            std::fs::read(dir.path().join("part_01_annotated.jpg")).unwrap(),
            vec![1, 2, 3]
        );
    }
}
