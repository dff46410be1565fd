use std::thread;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Serves `dir` over HTTP on a background thread.
pub fn start(dir: Utf8PathBuf, host: &str, port: u16) -> thread::JoinHandle<anyhow::Result<()>> {
    let host = host.to_string();

    info!(url = %style(format!("http://{host}:{port}/")).yellow(), "serving {dir}");

    thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(serve(dir, host, port))
    })
}

async fn serve(dir: Utf8PathBuf, host: String, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    let router = Router::new().fallback_service(ServeDir::new(dir));

    axum::serve(listener, router).await?;

    Ok(())
}
