//! Live reload: a websocket server telling open browser tabs to refresh.
//!
//! The server is enabled by a `livereload.json` file in the project root:
//!
//! ```json
//! { "port": 35729, "host": "127.0.0.1", "server": "public" }
//! ```
//!
//! Every field is optional. A missing or malformed file disables live
//! reload. Clients receive `{"command":"reload","path":"<glob>"}`, with
//! `"*"` asking for a full page refresh.

use std::fs;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tungstenite::WebSocket;

use crate::config::ReloadScope;
use crate::watch::Reloader;

pub const RELOAD_CONFIG: &str = "livereload.json";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 35729;
const DEFAULT_HTTP_PORT: u16 = 8080;

/// Connections kept open, older ones are closed first.
const MAX_CLIENTS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReloadConfig {
    /// Websocket port.
    pub port: Option<u16>,
    pub host: Option<String>,
    /// Directory served over HTTP, relative to the project root.
    pub server: Option<Utf8PathBuf>,
    /// Port of the HTTP server.
    pub http_port: Option<u16>,
}

impl ReloadConfig {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn http_port(&self) -> u16 {
        self.http_port.unwrap_or(DEFAULT_HTTP_PORT)
    }
}

/// Reads `livereload.json` from `root`. Any failure disables reload.
pub fn load_config(root: &Utf8Path) -> Option<ReloadConfig> {
    let path = root.join(RELOAD_CONFIG);

    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("live reload disabled, can't read {path}: {e}");
            return None;
        }
    };

    match serde_json::from_str(&text) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("live reload disabled, malformed {path}: {e}");
            None
        }
    }
}

#[derive(Serialize)]
struct Message<'a> {
    command: &'a str,
    path: &'a str,
}

pub(crate) fn message(scope: &ReloadScope) -> String {
    let message = Message {
        command: "reload",
        path: scope.target(),
    };

    // Two string fields always serialize.
    serde_json::to_string(&message).unwrap_or_default()
}

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Handle to a running reload server.
#[derive(Debug, Clone)]
pub struct ReloadServer {
    port: u16,
    tx: Sender<String>,
}

impl ReloadServer {
    /// Binds the websocket port and spawns the accept and broadcast threads.
    /// Falls back to a random port when the configured one is taken.
    pub fn start(config: &ReloadConfig) -> std::io::Result<Self> {
        let listener = match TcpListener::bind((config.host(), config.port())) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!("port {} unavailable ({e}), picking another", config.port());
                TcpListener::bind((config.host(), 0))?
            }
        };

        let port = listener.local_addr()?.port();
        let clients = Clients::default();

        accept_clients(listener, clients.clone());
        let (tx, _) = broadcast(clients);

        tracing::info!("live reload listening on ws://{}:{port}", config.host());

        Ok(Self { port, tx })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Reloader for ReloadServer {
    fn reload(&self, scope: &ReloadScope) {
        if self.tx.send(message(scope)).is_err() {
            tracing::error!("live reload thread is gone");
        }
    }
}

fn accept_clients(listener: TcpListener, clients: Clients) -> JoinHandle<()> {
    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!("live reload connection failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => clients
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(socket),
                Err(e) => tracing::debug!("rejected live reload client: {e}"),
            }
        }
    })
}

fn broadcast(clients: Clients) -> (Sender<String>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<String>();

    let thread = thread::spawn(move || {
        while let Ok(message) = rx.recv() {
            let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);

            clients.retain_mut(|socket| match socket.send(message.as_str().into()) {
                Ok(()) => true,
                Err(tungstenite::Error::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => false,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => false,
                Err(e) => {
                    tracing::error!("live reload: {e}");
                    true
                }
            });

            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }

            tracing::debug!(clients = clients.len(), "reload sent");
        }
    });

    (tx, thread)
}
