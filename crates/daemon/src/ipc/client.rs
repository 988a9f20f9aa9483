//! IPC Client for communicating with the daemon via Unix Domain Sockets.
//!
//! The client connects to the daemon's Unix socket and sends requests,
//! receiving responses in a request-response pattern.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::time::Duration;

use protocol::UploadItem;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::messages::{IpcRequest, IpcResponse};
use super::server::IpcError;

/// Default timeout for client operations in seconds. Archives of large
/// folders are built before the first response byte is sent.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// A client for communicating with the daemon via IPC.
pub struct IpcClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    timeout: Duration,
}

impl IpcClient {
    /// Connect to the daemon at the specified socket path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    /// This typically indicates that the daemon is not running.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await.map_err(IpcError::Io)?;
        Ok(Self::from_stream(stream, Duration::from_secs(DEFAULT_TIMEOUT_SECS)))
    }

    /// Connect to the daemon with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established in time.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| {
                IpcError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection timed out",
                ))
            })?
            .map_err(IpcError::Io)?;

        Ok(Self::from_stream(stream, timeout))
    }

    fn from_stream(stream: UnixStream, timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
        }
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request to the daemon and wait for a response.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The request cannot be serialized or sent
    /// - The response cannot be read or parsed
    /// - The operation times out
    pub async fn send(&mut self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        tokio::time::timeout(self.timeout, self.send_internal(request))
            .await
            .map_err(|_| {
                IpcError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "operation timed out",
                ))
            })?
    }

    async fn send_internal(&mut self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        let mut json = serde_json::to_string(&request).map_err(IpcError::Json)?;
        json.push('\n');

        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(IpcError::Io)?;
        self.writer.flush().await.map_err(IpcError::Io)?;

        let mut line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(IpcError::Io)?;

        if bytes_read == 0 {
            return Err(IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "daemon closed connection",
            )));
        }

        let response = serde_json::from_str(line.trim()).map_err(IpcError::Json)?;
        Ok(response)
    }

    /// Send a ping request to check if the daemon is responsive.
    ///
    /// Returns `true` if the daemon responds with a Pong, `false` otherwise.
    pub async fn ping(&mut self) -> Result<bool, IpcError> {
        let response = self.send(IpcRequest::Ping).await?;
        Ok(matches!(response, IpcResponse::Pong))
    }

    /// Run an action on the daemon.
    pub async fn execute(
        &mut self,
        params: BTreeMap<String, String>,
        items: Vec<UploadItem>,
    ) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Execute { params, items }).await
    }

    /// Ask the daemon to reload its configuration.
    pub async fn reload(&mut self) -> Result<(), IpcError> {
        match self.send(IpcRequest::Reload).await? {
            IpcResponse::Reloaded => Ok(()),
            IpcResponse::Error { message } => Err(IpcError::UnexpectedResponse(message)),
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::IpcServer;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_client_connect_fails_when_daemon_not_running() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("nonexistent.sock");

        let result = IpcClient::connect(&socket_path).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_client_ping() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let request = conn.next_request().await.unwrap().unwrap();
            assert_eq!(request, IpcRequest::Ping);
            conn.send_response(&IpcResponse::Pong).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        assert!(client.ping().await.unwrap());

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_execute() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            match conn.next_request().await.unwrap().unwrap() {
                IpcRequest::Execute { params, items } => {
                    assert_eq!(params.get("mode").map(String::as_str), Some("summarize"));
                    assert!(items.is_empty());
                }
                other => panic!("Expected Execute request, got {:?}", other),
            }
            conn.send_response(&IpcResponse::Json {
                body: serde_json::json!({"data": {"id": "/"}}),
            })
            .await
            .unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        let mut params = BTreeMap::new();
        params.insert("mode".to_string(), "summarize".to_string());
        let response = client.execute(params, Vec::new()).await.unwrap();

        match response {
            IpcResponse::Json { body } => assert_eq!(body["data"]["id"], "/"),
            other => panic!("Expected Json response, got {:?}", other),
        }

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_reload_error() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let request = conn.next_request().await.unwrap().unwrap();
            assert_eq!(request, IpcRequest::Reload);
            conn.send_response(&IpcResponse::Error {
                message: "bad config".to_string(),
            })
            .await
            .unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        let err = client.reload().await.unwrap_err();
        assert!(err.to_string().contains("bad config"));

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_timeout() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let _server_handle = tokio::spawn(async move {
            let _conn = server.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut client =
            IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(100))
                .await
                .unwrap();

        let result = client.ping().await;
        assert!(result.is_err());
    }
}
