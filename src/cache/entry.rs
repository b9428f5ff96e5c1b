//! キャッシュエントリ

/// キャッシュエントリ
///
/// キャッシュされたレスポンスのバイト列とキー（URI）を保持します。
/// 挿入時に内容をコピーして所有するため、呼び出し側のバッファには
/// 依存しません。構築後は不変です。
#[derive(Debug)]
pub struct CacheEntry {
    /// キャッシュキー（リクエストURI）
    uri: Box<str>,
    /// レスポンスのバイト列
    body: Box<[u8]>,
}

impl CacheEntry {
    /// キーとバイト列をコピーして新しいエントリを作成
    pub fn new(uri: &str, body: &[u8]) -> Self {
        Self {
            uri: uri.into(),
            body: body.into(),
        }
    }

    /// キャッシュキー（URI）
    #[inline]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// レスポンスのバイト列
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// ボディサイズ（バイト）
    #[inline]
    pub fn size(&self) -> usize {
        self.body.len()
    }
}
