//! プロキシ設定
//!
//! listenポートはコマンドラインで指定します。スレッド数とタイムアウトは
//! 任意の`proxy.toml`で上書きでき、ファイルがなければ既定値を使います。

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

/// デフォルト値関数
fn default_threads() -> usize {
    num_cpus::get()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_read_timeout_secs() -> u64 {
    30
}
fn default_write_timeout_secs() -> u64 {
    30
}
fn default_idle_timeout_secs() -> u64 {
    60
}

/// 実行時設定
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// アクセプタスレッド数
    pub threads: usize,
    /// オリジンへの接続タイムアウト
    pub connect_timeout: Duration,
    /// 読み込みタイムアウト
    pub read_timeout: Duration,
    /// 書き込みタイムアウト
    pub write_timeout: Duration,
    /// クライアントのリクエスト到着待ちタイムアウト
    pub idle_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ServerSection::default().into()
    }
}

impl ProxyConfig {
    /// 設定ファイルを読み込む
    ///
    /// ファイルが存在しない場合は既定値を返します。存在するのに解析
    /// できない場合はエラーです。
    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let config_str = fs::read_to_string(path)?;
        Self::from_toml(&config_str)
    }

    /// TOML文字列から設定を構築
    pub fn from_toml(config_str: &str) -> io::Result<Self> {
        let file: ConfigFile = toml::from_str(config_str).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("TOML parse error: {}", e),
            )
        })?;
        Ok(file.server.into())
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
}

#[derive(Deserialize)]
struct ServerSection {
    /// アクセプタスレッド数
    ///
    /// デフォルト: 論理CPU数
    #[serde(default = "default_threads")]
    threads: usize,

    /// オリジン接続タイムアウト（秒）
    ///
    /// デフォルト: 10秒
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,

    /// 読み込みタイムアウト（秒）
    ///
    /// デフォルト: 30秒
    #[serde(default = "default_read_timeout_secs")]
    read_timeout_secs: u64,

    /// 書き込みタイムアウト（秒）
    ///
    /// デフォルト: 30秒
    #[serde(default = "default_write_timeout_secs")]
    write_timeout_secs: u64,

    /// アイドルタイムアウト（秒）
    ///
    /// デフォルト: 60秒
    #[serde(default = "default_idle_timeout_secs")]
    idle_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl From<ServerSection> for ProxyConfig {
    fn from(section: ServerSection) -> Self {
        Self {
            threads: section.threads.max(1),
            connect_timeout: Duration::from_secs(section.connect_timeout_secs),
            read_timeout: Duration::from_secs(section.read_timeout_secs),
            write_timeout: Duration::from_secs(section.write_timeout_secs),
            idle_timeout: Duration::from_secs(section.idle_timeout_secs),
        }
    }
}
