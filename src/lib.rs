//! 並行キャッシュ付きHTTPフォワードプロキシ
//!
//! クライアントのGETリクエストを受け取り、オリジンへ転送して結果を
//! 返します。取得したレスポンスはバイト予算制の共有LRUキャッシュに
//! 保持し、同じURIへの後続リクエストにはオリジンへ接続せずに応答
//! します。
//!
//! ```text
//! client ──► acceptor ──► worker ──► cache lookup
//!                              │         │hit: キャッシュから応答
//!                              │         └miss: origin へ接続・転送・挿入
//!                              └ 接続ごとに独立（共有状態はキャッシュのみ）
//! ```

pub mod cache;
pub mod config;
pub mod forward;
pub mod request;
pub mod server;

pub use cache::{CacheEntry, ProxyCache, MAX_CACHE_SIZE, MAX_OBJECT_SIZE};
pub use config::ProxyConfig;
