//! プレビューハンドル
//!
//! ステージしたファイルの表示用参照（`preview://<n>`）。
//! 作成したハンドルは必ず1回だけ解放する。解放は所有権を消費するので
//! 二重解放は書けない。未解放数は `outstanding()` で確認できる。

use inspection_common::SourceHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct PreviewHandle {
    id: u64,
    url: String,
}

impl PreviewHandle {
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: u64,
    live: HashMap<u64, SourceHandle>,
}

#[derive(Debug, Clone, Default)]
pub struct PreviewRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, source: &SourceHandle) -> PreviewHandle {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.live.insert(id, source.clone());
        PreviewHandle {
            id,
            url: format!("preview://{}", id),
        }
    }

    /// ハンドルを解放する。登録済みだった場合は true
    pub fn release(&self, handle: PreviewHandle) -> bool {
        self.lock().live.remove(&handle.id).is_some()
    }

    /// URL から元ファイルを引く（解放済みなら None）
    pub fn resolve(&self, url: &str) -> Option<SourceHandle> {
        let id: u64 = url.strip_prefix("preview://")?.parse().ok()?;
        self.lock().live.get(&id).cloned()
    }

    pub fn outstanding(&self) -> usize {
        self.lock().live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_release() {
        let registry = PreviewRegistry::new();
        let source = SourceHandle::new("a.jpg", vec![1, 2]);
        let first = registry.create(&source);
        let second = registry.create(&source);
        assert_ne!(first.url(), second.url());
        assert_eq!(registry.outstanding(), 2);

        let url = first.url().to_string();
        assert_eq!(registry.resolve(&url).map(|s| s.len()), Some(2));
        assert!(registry.release(first));
        assert!(registry.resolve(&url).is_none());
        assert_eq!(registry.outstanding(), 1);

        assert!(registry.release(second));
        assert_eq!(registry.outstanding(), 0);
    }

    #[test]
    fn test_resolve_rejects_foreign_urls() {
        let registry = PreviewRegistry::new();
        assert!(registry.resolve("blob:abc").is_none());
        assert!(registry.resolve("preview://x").is_none());
    }
}
