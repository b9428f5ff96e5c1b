//! # プロキシキャッシュモジュール
//!
//! オリジンから取得したレスポンスを再利用してオリジンへの接続を
//! 省略するための、バイト予算制の共有LRUキャッシュを提供します。
//!
//! ## 特徴
//!
//! - **単一ロック**: キャッシュ全体を1つのMutexで排他（操作は短い
//!   メモリ操作のみで、I/Oをまたいでロックを保持しない）
//! - **参照カウント**: `get`が返す`Arc<CacheEntry>`がハンドル。
//!   追い出されたエントリも、読み手がハンドルを持つ間は解放されない
//! - **LRU Eviction**: サイズ合計が予算を超えた時点で、最も長く
//!   使われていないエントリから自動削除
//!
//! ## アーキテクチャ
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  ProxyCache (Mutex)                     │
//! │  ├─ LruCache<Box<str>, Arc<CacheEntry>> │← アクセス順 + 参照
//! │  └─ total: usize                        │← バイト予算の会計
//! └─────────────────────────────────────────┘
//! ```

mod entry;
mod memory;

pub use entry::CacheEntry;
pub use memory::{ProxyCache, MAX_CACHE_SIZE, MAX_OBJECT_SIZE};
