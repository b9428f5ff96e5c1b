//! リクエストの解析と書き換え
//!
//! クライアントから受信したHTTPリクエストをhttparseで解析し、
//! オリジンへ送る新しいリクエストを構築します。

use httparse::Status;

/// 書き換え後リクエストの最大サイズ（バイト）
///
/// 受信リクエストのヘッダーブロックにも同じ上限を適用します。
pub const MAX_REQUEST_SIZE: usize = 8192;

/// オリジンへ送るUser-Agent（固定値）
pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:3.10.0) Gecko/20220411 Firefox/63.0.1";

/// 解析済みリクエスト（ワーカーごとに1つ、接続をまたいで共有しない）
#[derive(Debug)]
pub struct RequestContext {
    /// リクエストラインに書かれたURI全体（キャッシュキーにもなる）
    pub uri: Box<str>,
    /// 接続先ホスト
    pub host: Box<str>,
    /// 接続先ポート（省略時80）
    pub port: u16,
    /// リソースパス（省略時"/"）
    pub path: Box<str>,
    /// クライアントが送ったヘッダー（パーサーが返した順、重複も保持）
    pub headers: Vec<(Box<str>, Box<[u8]>)>,
}

/// クライアントへ返すエラーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// リクエストを解析できない
    Malformed,
    /// HTTPバージョンが1.0でも1.1でもない
    BadVersion,
    /// GET以外のメソッド
    MethodNotImplemented,
    /// http以外のスキーム
    SchemeNotImplemented,
}

impl RequestError {
    /// ステータスコード・短いメッセージ・詳細メッセージ
    pub fn status(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            RequestError::Malformed => ("400", "Bad Request", "Cannot parse HTTP request"),
            RequestError::BadVersion => ("400", "Bad Request", "Wrong HTTP version"),
            RequestError::MethodNotImplemented => {
                ("501", "Not Implemented", "HTTP method not implemented")
            }
            RequestError::SchemeNotImplemented => {
                ("501", "Not Implemented", "HTTP scheme not implemented")
            }
        }
    }
}

/// 解析結果
#[derive(Debug)]
pub enum ParseOutcome {
    /// リクエスト全体を解析できた
    Complete(RequestContext),
    /// データ不足、追加の読み込みが必要
    Partial,
    /// 解析エラーまたは受け付けられないリクエスト
    Invalid(RequestError),
}

/// 蓄積済みのバイト列からリクエストを解析
///
/// ヘッダー終端までのデータが揃っていなければ`Partial`を返すので、
/// 呼び出し側は追加データを読み込んでから再度呼び出します。
pub fn parse_request(buf: &[u8]) -> ParseOutcome {
    let mut headers_storage = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers_storage);

    match req.parse(buf) {
        Ok(Status::Complete(_)) => {}
        Ok(Status::Partial) => return ParseOutcome::Partial,
        Err(_) => return ParseOutcome::Invalid(RequestError::Malformed),
    }

    // バージョンは1.0または1.1のみ（httparseは1.x以外を解析エラーにする）
    match req.version {
        Some(0) | Some(1) => {}
        _ => return ParseOutcome::Invalid(RequestError::BadVersion),
    }

    // メソッドはGETのみ（大文字小文字を区別する）
    match req.method {
        Some("GET") => {}
        Some(_) => return ParseOutcome::Invalid(RequestError::MethodNotImplemented),
        None => return ParseOutcome::Invalid(RequestError::Malformed),
    }

    let target = match req.path {
        Some(t) => t,
        None => return ParseOutcome::Invalid(RequestError::Malformed),
    };

    let (host, port, path) = match split_target(target) {
        Ok(parts) => parts,
        Err(e) => return ParseOutcome::Invalid(e),
    };

    let headers = req
        .headers
        .iter()
        .filter(|h| !h.name.is_empty())
        .map(|h| (Box::from(h.name), Box::from(h.value)))
        .collect();

    ParseOutcome::Complete(RequestContext {
        uri: target.into(),
        host,
        port,
        path,
        headers,
    })
}

/// 絶対URIをホスト・ポート・パスに分解
///
/// フォワードプロキシへのリクエストラインは`http://host:port/path`
/// 形式の絶対URIを要求します。スキームのないターゲットは解析エラー、
/// http以外のスキームは未実装として扱います。
fn split_target(target: &str) -> Result<(Box<str>, u16, Box<str>), RequestError> {
    let rest = match target.strip_prefix("http://") {
        Some(rest) => rest,
        None => {
            if target.contains("://") {
                return Err(RequestError::SchemeNotImplemented);
            }
            return Err(RequestError::Malformed);
        }
    };

    let (host_port, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let (host, port) = match host_port.find(':') {
        Some(idx) => {
            let port = host_port[idx + 1..]
                .parse()
                .map_err(|_| RequestError::Malformed)?;
            (&host_port[..idx], port)
        }
        None => (host_port, 80),
    };

    if host.is_empty() {
        return Err(RequestError::Malformed);
    }

    Ok((host.into(), port, path.into()))
}

/// オリジンへ送るリクエストを構築
///
/// ```text
/// GET <URI> HTTP/1.0\r\n
/// <上書き対象を除くクライアントのヘッダー>
/// Host: <host>:<port>\r\n      （クライアントがHostを送らなかった場合のみ）
/// Connection: close\r\n
/// Proxy-Connection: close\r\n
/// User-Agent: <固定値>\r\n
/// \r\n
/// ```
///
/// クライアントのバージョンに関係なく常にHTTP/1.0を名乗ります。
/// 上書き対象のヘッダー名は大文字小文字を区別して比較します。
///
/// 結果が`MAX_REQUEST_SIZE`を超える場合は`None`を返し、呼び出し側は
/// 何も送らずに接続を打ち切ります。
pub fn build_origin_request(ctx: &RequestContext) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(1024);
    out.extend_from_slice(b"GET ");
    out.extend_from_slice(ctx.uri.as_bytes());
    out.extend_from_slice(b" HTTP/1.0\r\n");

    let mut host_found = false;
    for (name, value) in &ctx.headers {
        let name = name.as_ref();

        // 常に上書きするヘッダーはここでは出力せず、後でまとめて付ける
        if name == "Connection" || name == "Proxy-Connection" || name == "User-Agent" {
            continue;
        }
        if name == "Host" {
            host_found = true;
        }

        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }

    if !host_found {
        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(ctx.host.as_bytes());
        out.extend_from_slice(b":");
        let mut port_buf = itoa::Buffer::new();
        out.extend_from_slice(port_buf.format(ctx.port).as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"Connection: close\r\nProxy-Connection: close\r\nUser-Agent: ");
    out.extend_from_slice(USER_AGENT.as_bytes());
    out.extend_from_slice(b"\r\n\r\n");

    if out.len() > MAX_REQUEST_SIZE {
        return None;
    }
    Some(out)
}
