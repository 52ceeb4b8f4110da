//! [`ConsoleServer`] – one command token per GET request.
//!
//! Listens on `0.0.0.0:8080` (configurable via
//! [`ConsoleServer::with_port`]). The first byte of the first path segment
//! is the token: `GET /w` drives forward, `GET /f` stands. Tokens travel
//! to the session serve loop over the command channel; the handler blocks
//! on the oneshot reply so the HTTP response reflects the dispatch
//! outcome. A missing token or a failed dispatch answers `failed`.

use std::net::SocketAddr;

use strider_core::{CommandRequest, DispatchOutcome, COMMAND_INPUT_RATE};
use strider_types::StriderError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Default TCP port for the command console.
pub const DEFAULT_PORT: u16 = 8080;

// ---------------------------------------------------------------------------
// ConsoleServer
// ---------------------------------------------------------------------------

/// The HTTP front door. Accepts connections until the shutdown flag
/// flips; each connection carries exactly one command request.
pub struct ConsoleServer {
    commands: mpsc::Sender<CommandRequest>,
    port: u16,
}

impl ConsoleServer {
    /// Create a server forwarding tokens into `commands` on the
    /// [`DEFAULT_PORT`].
    pub fn new(commands: mpsc::Sender<CommandRequest>) -> Self {
        Self {
            commands,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Return the configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind and serve until `shutdown` flips.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Comm`] if the TCP listener cannot bind.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), StriderError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StriderError::comm("console", format!("bind error on {addr}: {e}")))?;

        info!("command console listening on http://localhost:{}", self.port);
        accept_loop(listener, self.commands, shutdown).await;
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    commands: mpsc::Sender<CommandRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let commands = commands.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, commands).await {
                            debug!(%peer, %err, "console connection error");
                        }
                    });
                }
                Err(err) => {
                    warn!(%err, "console accept error");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    mut stream: TcpStream,
    commands: mpsc::Sender<CommandRequest>,
) -> Result<(), StriderError> {
    let mut buf = [0u8; 1024];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| StriderError::comm("console", format!("read error: {e}")))?;

    let request = String::from_utf8_lossy(&buf[..n]);
    let request_line = request.lines().next().unwrap_or("");

    let response = match parse_request(request_line) {
        ParsedRequest::Command(token) => {
            debug!(token = %token.escape_default(), "received command token");
            match dispatch(&commands, token).await {
                DispatchOutcome::Accepted => {
                    // Input-rate throttle: one token per interval and
                    // connection.
                    tokio::time::sleep(COMMAND_INPUT_RATE).await;
                    render_response("200 OK", "ok")
                }
                DispatchOutcome::Failed => render_response("200 OK", "failed"),
            }
        }
        ParsedRequest::MissingToken => render_response("200 OK", "failed"),
        ParsedRequest::MethodNotAllowed => render_response("405 Method Not Allowed", "failed"),
    };

    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| StriderError::comm("console", format!("write error: {e}")))?;
    Ok(())
}

/// Forward one token to the serve loop and wait for its outcome. A closed
/// channel (session already shut down) reads as a failed dispatch.
async fn dispatch(commands: &mpsc::Sender<CommandRequest>, token: char) -> DispatchOutcome {
    let (reply, outcome) = oneshot::channel();
    if commands.send(CommandRequest { token, reply }).await.is_err() {
        return DispatchOutcome::Failed;
    }
    outcome.await.unwrap_or(DispatchOutcome::Failed)
}

// ---------------------------------------------------------------------------
// Request parsing / response rendering
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum ParsedRequest {
    /// `GET /<token>[...]` – the first byte after the slash.
    Command(char),
    /// `GET /` or an empty path.
    MissingToken,
    /// Anything other than GET.
    MethodNotAllowed,
}

fn parse_request(request_line: &str) -> ParsedRequest {
    let mut parts = request_line.split_whitespace();
    if parts.next() != Some("GET") {
        return ParsedRequest::MethodNotAllowed;
    }
    let path = parts.next().unwrap_or("");
    match path.strip_prefix('/').and_then(|rest| rest.chars().next()) {
        Some(token) => ParsedRequest::Command(token),
        None => ParsedRequest::MissingToken,
    }
}

fn render_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET\r\n\
         Access-Control-Allow-Headers: x-prototype-version,x-requested-with\r\n\
         Access-Control-Max-Age: 2520\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
