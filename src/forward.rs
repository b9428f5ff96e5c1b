//! レスポンス転送
//!
//! オリジンからのレスポンスをEOFまでクライアントへ流し込み、
//! 全体が1オブジェクト分のバッファに収まった場合だけキャッシュへ
//! 挿入します。

use crate::cache::{ProxyCache, MAX_OBJECT_SIZE};
use ftlog::{error, warn};
use monoio::io::{AsyncReadRent, AsyncWriteRentExt};
use monoio::net::TcpStream;
use monoio::time::timeout;
use std::cell::RefCell;
use std::time::Duration;

/// 読み書きに使うバッファサイズ
pub(crate) const BUF_SIZE: usize = 65536;

// ====================
// バッファプール
// ====================
//
// monoioのI/Oはバッファの所有権を取るため、読み書きのたびに確保する
// 代わりにスレッドローカルのプールから再利用します。
// ====================

thread_local! {
    static BUF_POOL: RefCell<Vec<Vec<u8>>> = RefCell::new(
        (0..8).map(|_| vec![0u8; BUF_SIZE]).collect()
    );
}

/// バッファ取得ヘルパー
#[inline(always)]
pub(crate) fn buf_get() -> Vec<u8> {
    BUF_POOL.with(|p| p.borrow_mut().pop().unwrap_or_else(|| vec![0u8; BUF_SIZE]))
}

/// バッファ返却ヘルパー
///
/// 前のリクエストのデータが残らないよう、長さをクリアしてから
/// ゼロ初期化で埋め直します。
#[inline(always)]
pub(crate) fn buf_put(mut buf: Vec<u8>) {
    BUF_POOL.with(|p| {
        let mut pool = p.borrow_mut();
        if pool.len() < 32 {
            buf.clear();
            buf.resize(BUF_SIZE, 0);
            pool.push(buf);
        }
    });
}

// ====================
// レスポンス転送
// ====================

/// オリジンのレスポンスをクライアントへ転送
///
/// オリジンから受信したバイトはすべて順序どおりクライアントへ書き込み
/// ます。並行して`MAX_OBJECT_SIZE`までのバイトを候補バッファへ蓄積し、
/// EOF到達時点でレスポンス全体が候補バッファに収まっていれば
/// キャッシュへ挿入します。収まらなかったレスポンスはストリーミング
/// だけ行い、キャッシュしません。
///
/// 戻り値は転送したバイト数。オリジンからの読み込み失敗、または
/// クライアントへの書き込み失敗は交換全体の失敗として`None`を返します
/// （転送済みのバイトはそのままクライアントに残る）。
pub async fn forward_response(
    origin: &mut TcpStream,
    client: &mut TcpStream,
    cache: &ProxyCache,
    uri: &str,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Option<u64> {
    let mut candidate: Vec<u8> = Vec::with_capacity(MAX_OBJECT_SIZE);
    let mut overflowed = false;
    let mut total = 0u64;

    loop {
        let buf = buf_get();
        let read_result = timeout(read_timeout, origin.read(buf)).await;

        let (res, returned_buf) = match read_result {
            Ok(result) => result,
            Err(_) => {
                error!("Read timeout while fetching HTTP response from origin");
                return None;
            }
        };

        let n = match res {
            Ok(0) => {
                buf_put(returned_buf);
                break; // EOF
            }
            Ok(n) => n,
            Err(e) => {
                buf_put(returned_buf);
                error!("Failed to get HTTP response from origin: {}", e);
                return None;
            }
        };

        // 候補バッファに収まる間だけ蓄積する
        if !overflowed {
            if candidate.len() + n <= MAX_OBJECT_SIZE {
                candidate.extend_from_slice(&returned_buf[..n]);
            } else {
                overflowed = true;
                candidate.clear();
            }
        }

        let mut write_buf = returned_buf;
        write_buf.truncate(n);

        let write_result = timeout(write_timeout, client.write_all(write_buf)).await;
        match write_result {
            Ok((Ok(_), returned)) => buf_put(returned),
            Ok((Err(e), returned)) => {
                buf_put(returned);
                error!("Failed to send HTTP response to client: {}", e);
                return None;
            }
            Err(_) => {
                error!("Write timeout while sending HTTP response to client");
                return None;
            }
        }

        total += n as u64;
    }

    // レスポンス全体が1オブジェクト分に収まった場合だけキャッシュする
    if !overflowed && total > 0 {
        if !cache.insert(uri, &candidate) {
            warn!("Failed to cache HTTP response for {}", uri);
        }
    }

    Some(total)
}
