//! Listening side of the daemon socket.
//!
//! Requests arrive one JSON document per line. A line that does not decode
//! is answered with [`IpcResponse::Error`] by the connection itself and the
//! connection stays open, so [`IpcConnection::next_request`] only ever hands
//! out well-formed requests. A line longer than the request limit closes the
//! connection: the remainder of it cannot be told apart from the next one.

use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use super::messages::{IpcRequest, IpcResponse};

/// Largest accepted request line. Uploaded items travel base64-encoded
/// inside it.
pub const MAX_REQUEST_BYTES: u64 = 256 * 1024 * 1024;

/// Listener bound to the daemon socket.
pub struct IpcServer {
    listener: UnixListener,
    max_request_bytes: u64,
}

impl IpcServer {
    /// Bind to `path`, creating a private parent directory when missing.
    ///
    /// A socket left behind by an earlier run is replaced. Any other kind of
    /// file at `path` is left alone and binding fails. The socket itself is
    /// restricted to the current user.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                fs::set_permissions(parent, Permissions::from_mode(0o700))?;
            }
        }

        match fs::symlink_metadata(path) {
            Ok(m) if m.file_type().is_socket() => {
                debug!(socket = %path.display(), "Replacing stale socket");
                fs::remove_file(path)?;
            }
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", path.display()),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(path)?;
        fs::set_permissions(path, Permissions::from_mode(0o600))?;
        debug!(socket = %path.display(), "IPC server bound");

        Ok(Self {
            listener,
            max_request_bytes: MAX_REQUEST_BYTES,
        })
    }

    /// Override the request line limit for connections accepted from now on.
    pub fn with_max_request_bytes(mut self, limit: u64) -> Self {
        self.max_request_bytes = limit.max(1);
        self
    }

    /// Wait for the next client.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream, self.max_request_bytes))
    }
}

/// One client connection.
pub struct IpcConnection {
    reader: BufReader<ReadHalf<UnixStream>>,
    writer: WriteHalf<UnixStream>,
    max_request_bytes: u64,
}

impl IpcConnection {
    fn new(stream: UnixStream, max_request_bytes: u64) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            max_request_bytes,
        }
    }

    /// The next well-formed request, or `None` once the client hung up.
    ///
    /// Blank lines are skipped. Malformed lines are answered here and
    /// reading continues.
    pub async fn next_request(&mut self) -> Result<Option<IpcRequest>, IpcError> {
        loop {
            let Some(line) = self.read_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str(line) {
                Ok(request) => return Ok(Some(request)),
                Err(e) => {
                    warn!(error = %e, "Malformed request");
                    self.send_response(&IpcResponse::Error {
                        message: format!("malformed request: {}", e),
                    })
                    .await?;
                }
            }
        }
    }

    async fn read_line(&mut self) -> Result<Option<String>, IpcError> {
        let limit = self.max_request_bytes;
        let mut line = String::new();
        let read = (&mut self.reader).take(limit).read_line(&mut line).await?;

        if read == 0 {
            return Ok(None);
        }
        if read as u64 >= limit && !line.ends_with('\n') {
            warn!(limit, "Request line too long, closing connection");
            self.send_response(&IpcResponse::Error {
                message: format!("request exceeds {} bytes", limit),
            })
            .await?;
            return Err(IpcError::RequestTooLarge(limit));
        }
        Ok(Some(line))
    }

    /// Write one response line.
    pub async fn send_response(&mut self, response: &IpcResponse) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Errors raised on either end of the socket.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A request line exceeded the configured limit.
    #[error("request exceeds {0} bytes")]
    RequestTooLarge(u64),

    /// The daemon answered with something other than what was asked for.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}
