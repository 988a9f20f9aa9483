//! Socket service.
//!
//! Serves [`IpcRequest`]s against a shared [`ActionEngine`]. Each request
//! runs on the blocking pool since every engine call does blocking
//! filesystem I/O. A reload builds a fresh engine from the configuration
//! file and swaps it in; requests already running keep the engine they
//! started with.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use protocol::UploadItem;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::ActionEngine;
use crate::ipc::{IpcConnection, IpcRequest, IpcResponse, IpcServer};
use crate::transport::BufferedTransport;

/// Long-running service owning the current engine.
pub struct FileService {
    engine: RwLock<Arc<ActionEngine>>,
    config_path: Option<PathBuf>,
}

impl FileService {
    /// `config_path` is re-read on reload; `None` means the default location.
    pub fn new(engine: ActionEngine, config_path: Option<PathBuf>) -> Self {
        Self {
            engine: RwLock::new(Arc::new(engine)),
            config_path,
        }
    }

    /// The engine serving new requests.
    pub async fn engine(&self) -> Arc<ActionEngine> {
        Arc::clone(&*self.engine.read().await)
    }

    /// Re-read the configuration and replace the engine.
    ///
    /// On failure the current engine stays in place.
    pub async fn reload(&self) -> Result<()> {
        let mut config = match &self.config_path {
            Some(path) => Config::load(path)?,
            None => Config::load_default()?,
        };
        config.apply_env_overrides();

        let engine = tokio::task::spawn_blocking(move || ActionEngine::new(&config))
            .await
            .context("Engine construction task failed")?
            .context("Invalid configuration")?;

        *self.engine.write().await = Arc::new(engine);
        info!("Configuration reloaded");
        Ok(())
    }

    /// Answer a single request.
    pub async fn handle_request(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::Reload => match self.reload().await {
                Ok(()) => IpcResponse::Reloaded,
                Err(e) => {
                    error!(error = %format!("{:#}", e), "Reload failed");
                    IpcResponse::Error {
                        message: format!("{:#}", e),
                    }
                }
            },
            IpcRequest::Execute { params, items } => self.execute(params, items).await,
        }
    }

    async fn execute(&self, params: BTreeMap<String, String>, items: Vec<UploadItem>) -> IpcResponse {
        let engine = self.engine().await;
        let joined = tokio::task::spawn_blocking(move || {
            let mut transport = BufferedTransport::new(params, items);
            if let Err(never) = engine.handle(&mut transport) {
                match never {}
            }
            transport.into_reply()
        })
        .await;

        match joined {
            Ok(Some(reply)) => reply.into(),
            Ok(None) => IpcResponse::Error {
                message: "engine produced no reply".to_string(),
            },
            Err(e) => {
                error!(error = %e, "Action task failed");
                IpcResponse::Error {
                    message: "action task failed".to_string(),
                }
            }
        }
    }

    /// Accept connections until `shutdown` completes.
    pub async fn serve<F>(self: Arc<Self>, server: IpcServer, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Service shutting down");
                    break;
                }
                accepted = server.accept() => match accepted {
                    Ok(conn) => {
                        let service = Arc::clone(&self);
                        tokio::spawn(async move { service.handle_connection(conn).await });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                }
            }
        }
        Ok(())
    }

    async fn handle_connection(&self, mut conn: IpcConnection) {
        loop {
            let request = match conn.next_request().await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!("Client disconnected");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Connection closed");
                    break;
                }
            };

            let response = self.handle_request(request).await;
            if let Err(e) = conn.send_response(&response).await {
                warn!(error = %e, "Failed to send response");
                break;
            }
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
pub async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Failed to register signal handlers, falling back to Ctrl-C");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to wait for Ctrl-C");
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}
