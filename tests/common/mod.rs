//! テスト用共通ヘルパーモジュール
//!
//! 統合テストおよびE2Eテストで使用する共通のユーティリティを提供します。

use proxy::config::ProxyConfig;
use proxy::server;
use proxy::ProxyCache;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 動的に空きポートを取得
pub fn get_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// ポートが利用可能になるまで待機
pub fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

/// Content-Length付きのHTTP/1.0レスポンスを組み立てる
pub fn http_response(body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.0 200 OK\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

/// テスト用オリジンサーバー
///
/// 受け付けた接続ごとにリクエストヘッダーを読み取って記録し、
/// 指定されたバイト列をそのまま返して接続を閉じます。接続回数を
/// 数えるので、キャッシュヒット時にオリジンへ接続していないことを
/// 検証できます。
pub struct MockOrigin {
    handle: Option<std::thread::JoinHandle<()>>,
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockOrigin {
    /// 新しいオリジンサーバーを起動
    ///
    /// # Arguments
    /// * `response` - そのまま返すレスポンスのバイト列
    pub fn start(response: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));
        let hits = Arc::new(AtomicUsize::new(0));
        let requests: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

        let shutdown_clone = shutdown.clone();
        let hits_clone = hits.clone();
        let requests_clone = requests.clone();

        let _ = listener.set_nonblocking(true);

        let handle = std::thread::spawn(move || {
            while !shutdown_clone.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        hits_clone.fetch_add(1, Ordering::SeqCst);

                        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
                        let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));

                        // リクエストヘッダーを終端（空行）まで読み取る
                        let mut request = Vec::new();
                        let mut buf = [0u8; 4096];
                        loop {
                            match stream.read(&mut buf) {
                                Ok(0) => break,
                                Ok(n) => {
                                    request.extend_from_slice(&buf[..n]);
                                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                                        break;
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                        requests_clone.lock().unwrap().push(request);

                        let _ = stream.write_all(&response);
                        // ドロップで接続が閉じ、プロキシ側はEOFを観測する
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            handle: Some(handle),
            addr,
            shutdown,
            hits,
            requests,
        }
    }

    /// サーバーのアドレスを取得
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// サーバーのポートを取得
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// 受け付けた接続の回数
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// 最後に受信したリクエストのバイト列
    pub fn last_request(&self) -> Option<Vec<u8>> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Drop for MockOrigin {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// テスト用にプロキシをバックグラウンドで起動してポートを返す
///
/// プロキシはプロセス終了まで動き続けます（テストごとに専用ポートを
/// 使うので停止は不要）。
pub fn start_proxy() -> u16 {
    let port = get_available_port();
    let listen_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let cache = Arc::new(ProxyCache::new());
    let config = ProxyConfig {
        threads: 1,
        ..ProxyConfig::default()
    };

    std::thread::spawn(move || {
        server::run(listen_addr, config, cache);
    });

    assert!(
        wait_for_port(port, Duration::from_secs(5)),
        "proxy did not start on port {}",
        port
    );
    port
}

/// プロキシ経由でリクエストを送り、レスポンス全体を受信する
pub fn proxy_request(proxy_port: u16, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", proxy_port)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    stream.write_all(request).unwrap();

    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    response
}
