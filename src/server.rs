//! 接続処理とアクセプタ
//!
//! アクセプタはスレッドごとのランタイムで接続を受け付け、接続1本に
//! つき1つのワーカータスクを起動します。ワーカーはリクエストの解析、
//! キャッシュ参照、オリジンへの転送までを単独で行い、どの経路でも
//! 自分のソケットを閉じて終了します。

use crate::cache::ProxyCache;
use crate::config::ProxyConfig;
use crate::forward::{buf_get, buf_put, forward_response, BUF_SIZE};
use crate::request::{self, ParseOutcome, RequestContext, MAX_REQUEST_SIZE};
use ftlog::{error, info};
use monoio::io::{AsyncReadRent, AsyncWriteRentExt};
use monoio::net::{TcpListener, TcpStream};
use monoio::time::timeout;
use monoio::RuntimeBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use time::OffsetDateTime;

// ====================
// Graceful Shutdown フラグ
// ====================

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

/// 全アクセプタに停止を要求
pub fn request_shutdown() {
    SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
}

// ====================
// アクセプタ
// ====================

/// プロキシを起動して停止要求まで接続を受け付ける
///
/// `config.threads`本のスレッドを起動し、それぞれが自分のランタイムと
/// `SO_REUSEPORT`リスナーを持ちます。listenに失敗した場合はプロセスを
/// 終了コード1で終了します。
pub fn run(listen_addr: SocketAddr, config: ProxyConfig, cache: Arc<ProxyCache>) {
    let num_threads = config.threads;
    let mut handles = Vec::with_capacity(num_threads);

    for thread_id in 0..num_threads {
        let cache = Arc::clone(&cache);
        let config = config.clone();

        let handle = thread::spawn(move || {
            let mut rt = RuntimeBuilder::<monoio::FusionDriver>::new()
                .enable_timer()
                .build()
                .expect("Failed to create runtime");
            rt.block_on(async move {
                let listener = match create_listener(listen_addr) {
                    Ok(l) => l,
                    Err(e) => {
                        error!("[Thread {}] Failed to listen on {}: {}", thread_id, listen_addr, e);
                        std::process::exit(1);
                    }
                };

                info!("[Thread {}] Worker started", thread_id);

                loop {
                    if SHUTDOWN_FLAG.load(Ordering::Relaxed) {
                        info!("[Thread {}] Shutting down...", thread_id);
                        break;
                    }

                    // タイムアウト付きaccept（停止要求を定期確認するため）
                    let accept_result = timeout(Duration::from_secs(1), listener.accept()).await;

                    let (stream, peer_addr) = match accept_result {
                        Ok(Ok(s)) => s,
                        Ok(Err(e)) => {
                            error!("[Thread {}] Accept error: {}", thread_id, e);
                            continue;
                        }
                        Err(_) => continue,
                    };

                    let _ = stream.set_nodelay(true);

                    let cache = Arc::clone(&cache);
                    let config = config.clone();

                    monoio::spawn(async move {
                        handle_connection(stream, peer_addr, cache, config).await;
                    });
                }

                info!("[Thread {}] Worker stopped", thread_id);
            });
        });
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.join();
    }
}

fn create_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let config = monoio::net::ListenerConfig::default()
        .reuse_port(true)
        .backlog(1024);
    TcpListener::bind_with_config(addr, &config)
}

// ====================
// 接続処理
// ====================

/// 1接続を処理する
///
/// 常に1リクエスト1接続で、応答後は必ず接続を閉じます。どの終了経路
/// でもクライアントソケット・オリジンソケット・解析結果はこの関数を
/// 抜けた時点で解放されます。
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    cache: Arc<ProxyCache>,
    config: ProxyConfig,
) {
    let mut accumulated = Vec::with_capacity(BUF_SIZE);

    // リクエストヘッダーが揃うまで読み込んで解析
    let ctx: RequestContext = loop {
        let buf = buf_get();
        let read_result = timeout(config.idle_timeout, stream.read(buf)).await;

        let (res, returned_buf) = match read_result {
            Ok(result) => result,
            Err(_) => return, // アイドルタイムアウト
        };

        let n = match res {
            Ok(0) => {
                buf_put(returned_buf);
                return; // 空リクエストまたは途中EOF
            }
            Ok(n) => n,
            Err(_) => {
                buf_put(returned_buf);
                return;
            }
        };

        accumulated.extend_from_slice(&returned_buf[..n]);
        buf_put(returned_buf);

        if accumulated.len() > MAX_REQUEST_SIZE {
            send_error_reply(&mut stream, "400", "Bad Request", "Request too large", &config)
                .await;
            return;
        }

        match request::parse_request(&accumulated) {
            ParseOutcome::Complete(ctx) => break ctx,
            ParseOutcome::Partial => continue,
            ParseOutcome::Invalid(err) => {
                let (code, short, long) = err.status();
                send_error_reply(&mut stream, code, short, long, &config).await;
                return;
            }
        }
    };

    let start_time = OffsetDateTime::now_utc();

    // キャッシュにあればオリジンへ接続せずに応答する
    if let Some(entry) = cache.get(&ctx.uri) {
        let body = entry.body().to_vec();
        let write_result = timeout(config.write_timeout, stream.write_all(body)).await;
        if !matches!(write_result, Ok((Ok(_), _))) {
            error!("Failed to send cached HTTP response to client");
        }
        log_access(&ctx.uri, peer_addr, "HIT", entry.size() as u64, start_time);
        return;
    }

    // キャッシュミス：書き換えたリクエストをオリジンへ転送する
    let new_req = match request::build_origin_request(&ctx) {
        Some(req) => req,
        None => {
            error!(
                "Rewritten request for {} exceeds {} bytes, aborting",
                ctx.uri, MAX_REQUEST_SIZE
            );
            return;
        }
    };

    let origin_addr = format!("{}:{}", ctx.host, ctx.port);
    let connect_result = timeout(config.connect_timeout, TcpStream::connect(&origin_addr)).await;

    let mut origin = match connect_result {
        Ok(Ok(s)) => {
            let _ = s.set_nodelay(true);
            s
        }
        Ok(Err(e)) => {
            error!("Failed to connect to host {}: {}", origin_addr, e);
            return;
        }
        Err(_) => {
            error!("Connect timeout to host {}", origin_addr);
            return;
        }
    };

    let write_result = timeout(config.write_timeout, origin.write_all(new_req)).await;
    if !matches!(write_result, Ok((Ok(_), _))) {
        error!("Failed to forward request to {}", origin_addr);
        return;
    }

    match forward_response(
        &mut origin,
        &mut stream,
        &cache,
        &ctx.uri,
        config.read_timeout,
        config.write_timeout,
    )
    .await
    {
        Some(total) => log_access(&ctx.uri, peer_addr, "MISS", total, start_time),
        None => error!("Failed to forward HTTP response to client for {}", ctx.uri),
    }
}

// ====================
// エラーレスポンス
// ====================

/// エラー内容を載せたHTMLレスポンスを構築
fn build_error_reply(code: &str, short: &str, long: &str) -> Vec<u8> {
    let body = format!(
        "<!DOCTYPE html>\r\n\
         <html>\r\n\
         <head><title>Error</title></head>\r\n\
         <body bgcolor=\"ffffff\">\r\n\
         <h1>{}: {}</h1>\r\n\
         <p>{}</p>\r\n\
         <hr /><em>Proxy</em>\r\n\
         </body></html>\r\n",
        code, short, long
    );

    let mut reply = Vec::with_capacity(128 + body.len());
    reply.extend_from_slice(b"HTTP/1.0 ");
    reply.extend_from_slice(code.as_bytes());
    reply.extend_from_slice(b" ");
    reply.extend_from_slice(short.as_bytes());
    reply.extend_from_slice(b"\r\nContent-Type: text/html\r\nContent-Length: ");
    let mut num_buf = itoa::Buffer::new();
    reply.extend_from_slice(num_buf.format(body.len()).as_bytes());
    reply.extend_from_slice(b"\r\n\r\n");
    reply.extend_from_slice(body.as_bytes());
    reply
}

async fn send_error_reply(
    stream: &mut TcpStream,
    code: &str,
    short: &str,
    long: &str,
    config: &ProxyConfig,
) {
    let reply = build_error_reply(code, short, long);
    let _ = timeout(config.write_timeout, stream.write_all(reply)).await;
}

// ====================
// アクセスログ
// ====================

fn log_access(uri: &str, peer: SocketAddr, cache_state: &str, resp_size: u64, start_time: OffsetDateTime) {
    let duration_ms = (OffsetDateTime::now_utc() - start_time).whole_milliseconds();
    info!(
        "Access: peer={} cache={} duration={}ms uri={} resp_size={}",
        peer, cache_state, duration_ms, uri, resp_size
    );
}
