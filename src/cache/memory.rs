//! メモリキャッシュ
//!
//! URIをキーとするバイト予算制のLRUキャッシュを提供します。
//! 単一のMutexで全操作を排他し、エントリの寿命は参照カウント
//! （`Arc`）で管理します。

use super::entry::CacheEntry;
use lru::LruCache;
use std::sync::{Arc, Mutex};

/// キャッシュ全体の最大サイズ（バイト）
pub const MAX_CACHE_SIZE: usize = 1024 * 1024;

/// 単一オブジェクトの最大サイズ（バイト）
pub const MAX_OBJECT_SIZE: usize = 100 * 1024;

/// URI → レスポンスバイト列のLRUキャッシュ
///
/// - 保持中エントリのサイズ合計は常に`max_bytes`以下
/// - `get`はエントリを最近使用側へ昇格し`Arc`ハンドルを返す
/// - 追い出しはキャッシュ側の参照を手放すだけなので、読み手が
///   保持しているハンドルは`drop`されるまで有効なまま
///
/// ロックはメモリ上の操作の間だけ保持し、I/Oをまたいで保持しては
/// いけません。
pub struct ProxyCache {
    inner: Mutex<CacheInner>,
    /// キャッシュ全体のバイト予算
    max_bytes: usize,
    /// 単一オブジェクトの上限（これを超える挿入は拒否）
    max_object: usize,
}

struct CacheInner {
    /// アクセス順を管理するLRU（先頭が最近使用、末尾が追い出し候補）
    lru: LruCache<Box<str>, Arc<CacheEntry>>,
    /// 保持中エントリのサイズ合計
    total: usize,
}

impl ProxyCache {
    /// 既定の制限（1MiB / 100KiB）で空のキャッシュを作成
    pub fn new() -> Self {
        Self::with_limits(MAX_CACHE_SIZE, MAX_OBJECT_SIZE)
    }

    /// 制限を指定してキャッシュを作成
    ///
    /// # Arguments
    ///
    /// * `max_bytes` - 保持できるサイズ合計の上限
    /// * `max_object` - 単一エントリのサイズ上限
    pub fn with_limits(max_bytes: usize, max_object: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruCache::unbounded(),
                total: 0,
            }),
            max_bytes,
            max_object,
        }
    }

    /// エントリを挿入
    ///
    /// キーとバイト列はコピーして取り込みます。既存キーへの挿入は
    /// 内容を置き換えず、エントリを最近使用側へ昇格するだけです
    /// （呼び出し側は「既にキャッシュ済み」として扱う）。
    ///
    /// 新規挿入後、サイズ合計が予算を超えている間は末尾（最も長く
    /// 使われていないエントリ）から追い出します。追い出しで手放すのは
    /// キャッシュ自身の参照だけで、読み手のハンドルは無効化しません。
    ///
    /// サイズ上限を超えるオブジェクトは拒否し`false`を返します。
    /// その場合キャッシュの状態は変化しません。
    pub fn insert(&self, uri: &str, body: &[u8]) -> bool {
        if body.len() > self.max_object {
            return false;
        }

        let mut inner = self.inner.lock().unwrap();

        if inner.lru.contains(uri) {
            inner.lru.promote(uri);
            return true;
        }

        let entry = Arc::new(CacheEntry::new(uri, body));
        inner.total += entry.size();
        inner.lru.put(Box::from(uri), entry);

        // 予算内に収まるまで末尾から追い出す
        while inner.total > self.max_bytes {
            match inner.lru.pop_lru() {
                Some((_, evicted)) => inner.total -= evicted.size(),
                None => break,
            }
        }

        true
    }

    /// エントリを取得
    ///
    /// ヒットした場合はエントリを最近使用側へ昇格し、ハンドルを
    /// 返します。ハンドルが生きている間、エントリのバイト列は移動も
    /// 解放もされません（解放はハンドルの`drop`が参照を手放してから）。
    ///
    /// ミスの場合は`None`。進行中の挿入を待つことはありません。
    pub fn get(&self, uri: &str) -> Option<Arc<CacheEntry>> {
        let mut inner = self.inner.lock().unwrap();
        inner.lru.get(uri).map(Arc::clone)
    }

    /// 現在のエントリ数
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().lru.len()
    }

    /// キャッシュが空かどうか
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 保持中エントリのサイズ合計（バイト）
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().unwrap().total
    }

    /// キャッシュ全体のバイト予算
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// 単一オブジェクトのサイズ上限
    pub fn max_object(&self) -> usize {
        self.max_object
    }
}

impl Default for ProxyCache {
    fn default() -> Self {
        Self::new()
    }
}
