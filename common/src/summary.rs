//! 結果コレクションの集計
//!
//! サマリ画面用: 件数、合格率、不合格理由の内訳

use crate::types::{AnalysisResult, Verdict};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSummary {
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    /// 合格率（%、整数に丸める）
    pub pass_rate: u32,
    pub fail_reasons: BTreeMap<String, usize>,
}

impl ResultSummary {
    pub fn from_results(results: &[AnalysisResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Default::default()
        };

        for result in results {
            match result.verdict {
                Verdict::Pass => summary.pass += 1,
                Verdict::Fail => {
                    summary.fail += 1;
                    if let Some(reason) = result.reason.as_deref().filter(|r| !r.is_empty()) {
                        *summary.fail_reasons.entry(reason.to_string()).or_default() += 1;
                    }
                }
            }
        }

        if summary.total > 0 {
            summary.pass_rate = ((summary.pass as f64 / summary.total as f64) * 100.0).round() as u32;
        }
        summary
    }

    /// 件数の多い順に不合格理由を返す
    pub fn top_fail_reasons(&self) -> Vec<(&str, usize)> {
        let mut reasons: Vec<(&str, usize)> = self
            .fail_reasons
            .iter()
            .map(|(reason, count)| (reason.as_str(), *count))
            .collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        reasons
    }
}
