use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use ftlog::info;
use proxy::cache::ProxyCache;
use proxy::config::ProxyConfig;
use proxy::server;
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::process;
use std::sync::Arc;

fn main() {
    let _guard = ftlog::Builder::new().try_init().unwrap();

    // 切断済みクライアントへの書き込みでプロセスが落ちないようにする
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: {} <port>", args[0]);
        process::exit(1);
    }

    let port: u16 = match args[1].parse() {
        Ok(p) => p,
        Err(_) => {
            eprintln!("Invalid port: {}", args[1]);
            process::exit(1);
        }
    };

    let config = match ProxyConfig::load(Path::new("proxy.toml")) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config load error: {}", e);
            process::exit(1);
        }
    };

    let cache = Arc::new(ProxyCache::new());
    let listen_addr = SocketAddr::from(([0, 0, 0, 0], port));

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    info!("============================================");
    info!("Caching HTTP Forward Proxy");
    info!("Hostname: {}", hostname);
    info!("Listen Address: {}", listen_addr);
    info!("Threads: {}", config.threads);
    info!("Cache Budget: {} bytes", cache.max_bytes());
    info!("Max Object Size: {} bytes", cache.max_object());
    info!("Connect Timeout: {:?}", config.connect_timeout);
    info!("Read Timeout: {:?}", config.read_timeout);
    info!("Write Timeout: {:?}", config.write_timeout);
    info!("Idle Timeout: {:?}", config.idle_timeout);
    info!("============================================");

    setup_signal_handler();

    server::run(listen_addr, config, cache);

    info!("Proxy shutdown complete");
}

/// シグナルハンドラのセットアップ
fn setup_signal_handler() {
    // SIGINT, SIGTERM をキャッチしてシャットダウンフラグを設定
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, initiating graceful shutdown...");
        server::request_shutdown();
    })
    .expect("Failed to set signal handler");
}
