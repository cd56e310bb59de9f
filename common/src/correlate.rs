//! バッチ結果とステージ済みファイルの照合
//!
//! バックエンドが返したファイル名と表示名を突き合わせる。
//! 同名ファイルが複数ある場合は、まだ使われていない最初の一致を採用する。
//! 一致しない結果は画像なしになる。

use crate::types::{AnalysisResult, SourceHandle};
use crate::wire::ResultEntry;

/// バッチ結果を AnalysisResult に変換し、ステージ済みファイルを紐づける
pub fn correlate_batch(entries: Vec<ResultEntry>, staged: &[SourceHandle]) -> Vec<AnalysisResult> {
    let mut consumed = vec![false; staged.len()];

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let matched = staged
                .iter()
                .enumerate()
                .find(|(i, handle)| !consumed[*i] && handle.name() == entry.filename)
                .map(|(i, handle)| {
                    consumed[i] = true;
                    handle.clone()
                });
            entry.into_batch_result(index, matched)
        })
        .collect()
}
