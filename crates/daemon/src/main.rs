//! Filedeck Daemon
//!
//! Policy-checked file manager engine served over a local socket.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use filedeck::config::Config;
use filedeck::engine::ActionEngine;
use filedeck::ipc::{get_socket_path, IpcClient, IpcResponse, IpcServer};
use filedeck::service::{wait_for_shutdown_signal, FileService};
use filedeck::transport::{BufferedTransport, Reply, ACTION_PARAM};
use protocol::{ActionOutcome, BinaryPayload, UploadItem};
use serde_json::Value;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Filedeck Daemon - file manager engine behind a browser UI.
#[derive(Parser, Debug)]
#[command(name = "filedeck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve actions on the local socket until SIGTERM or SIGINT
    Serve {
        /// Socket path (overrides the configured one)
        #[arg(long, short, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Run one action in this process against the configured doc root
    Exec(ActionArgs),

    /// Run one action on the running daemon
    Call {
        #[command(flatten)]
        action: ActionArgs,

        /// Socket path (overrides the configured one)
        #[arg(long, short, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Check that the daemon answers
    Ping {
        #[arg(long, short, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Ask the daemon to reload its configuration
    Reload {
        #[arg(long, short, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

/// One action invocation.
#[derive(Args, Debug, Clone)]
pub struct ActionArgs {
    /// Action name (getfolder, upload, download, ...)
    pub action: String,

    /// Request parameter, repeatable
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// File to upload, repeatable
    #[arg(long = "upload", short = 'u', value_name = "FILE")]
    pub uploads: Vec<PathBuf>,

    /// Where to write binary responses (defaults to the served file name)
    #[arg(long, short, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    config.validate()?;

    let _guard = init_logging(&config, cli.verbose)?;
    if let Some(path) = &cli.config {
        tracing::info!("Using config file: {:?}", path);
    }

    match cli.command {
        Commands::Serve { socket } => {
            let socket_path = socket_path(socket, &config);
            let engine = ActionEngine::new(&config)?;
            tracing::info!(
                doc_root = %engine.doc_root().display(),
                socket = %socket_path.display(),
                "Filedeck daemon starting"
            );

            let server = IpcServer::bind(&socket_path)
                .await
                .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;
            let service = Arc::new(FileService::new(engine, cli.config.clone()));
            let result = service.serve(server, wait_for_shutdown_signal()).await;

            if let Err(e) = std::fs::remove_file(&socket_path) {
                tracing::warn!(error = %e, "Failed to remove socket file");
            }
            result?;
            tracing::info!("Filedeck daemon stopped");
        }
        Commands::Exec(args) => {
            let (params, items) = build_request(&args)?;
            let engine = match ActionEngine::new(&config) {
                Ok(engine) => engine,
                Err(e) => {
                    if let ActionOutcome::Json(result) = ActionEngine::unavailable(e) {
                        print_json(&config.options.render_options().render(&result))?;
                    }
                    anyhow::bail!("No engine could be built from the configuration");
                }
            };
            let mut transport = BufferedTransport::new(params, items);
            if let Err(never) = engine.handle(&mut transport) {
                match never {}
            }
            match transport.into_reply() {
                Some(Reply::Json(body)) => print_json(&body)?,
                Some(Reply::Binary(payload)) => save_binary(&payload, args.output.as_deref())?,
                None => anyhow::bail!("Engine produced no reply"),
            }
        }
        Commands::Call { action, socket } => {
            let (params, items) = build_request(&action)?;
            let mut client = connect(socket, &config).await?;
            match client.execute(params, items).await? {
                IpcResponse::Json { body } => print_json(&body)?,
                IpcResponse::Binary(payload) => save_binary(&payload, action.output.as_deref())?,
                IpcResponse::Error { message } => anyhow::bail!("Daemon returned error: {}", message),
                other => anyhow::bail!("Unexpected response from daemon: {:?}", other),
            }
        }
        Commands::Ping { socket } => {
            let socket_path = socket_path(socket, &config);
            let mut client = IpcClient::connect_with_timeout(&socket_path, Duration::from_secs(5))
                .await
                .map_err(|e| anyhow::anyhow!("Cannot connect to daemon: {}", e))?;
            if client.ping().await? {
                println!("Daemon is running ({})", socket_path.display());
            } else {
                anyhow::bail!("Daemon did not answer the ping");
            }
        }
        Commands::Reload { socket } => {
            let mut client = connect(socket, &config).await?;
            client
                .reload()
                .await
                .map_err(|e| anyhow::anyhow!("Reload failed: {}", e))?;
            println!("Configuration reloaded");
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Install the tracing subscriber. The returned guard flushes the log file
/// when dropped.
fn init_logging(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    match &config.daemon.log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("log_file has no file name: {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}

fn socket_path(flag: Option<PathBuf>, config: &Config) -> PathBuf {
    flag.or_else(|| config.daemon.socket_path.clone())
        .unwrap_or_else(get_socket_path)
}

async fn connect(flag: Option<PathBuf>, config: &Config) -> anyhow::Result<IpcClient> {
    let socket_path = socket_path(flag, config);
    IpcClient::connect(&socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("Cannot connect to daemon at {}: {}", socket_path.display(), e))
}

/// Turn CLI arguments into a parameter map and upload items.
fn build_request(args: &ActionArgs) -> anyhow::Result<(BTreeMap<String, String>, Vec<UploadItem>)> {
    let mut params: BTreeMap<String, String> = args.params.iter().cloned().collect();
    params.insert(ACTION_PARAM.to_string(), args.action.clone());

    let mut items = Vec::with_capacity(args.uploads.len());
    for path in &args.uploads {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read upload: {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("Upload has no file name: {}", path.display()))?;
        let content_type = mime_guess::from_path(path).first_or_octet_stream();
        items.push(UploadItem::new(file_name, content_type.essence_str(), data));
    }

    Ok((params, items))
}

fn print_json(body: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(())
}

fn save_binary(payload: &BinaryPayload, output: Option<&Path>) -> anyhow::Result<()> {
    let path = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(sanitize_output_name(&payload.file_name)),
    };
    std::fs::write(&path, &payload.data)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!(
        "Wrote {} bytes ({}) to {}",
        payload.data.len(),
        payload.content_type,
        path.display()
    );
    Ok(())
}

/// Served names come from the daemon; keep only the final component.
fn sanitize_output_name(name: &str) -> String {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or_default();
    if base.is_empty() || base == "." || base == ".." {
        "download.bin".to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_command() {
        let cli = Cli::try_parse_from(["filedeck", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { socket } => assert!(socket.is_none()),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_with_socket() {
        let cli = Cli::try_parse_from(["filedeck", "serve", "--socket", "/tmp/x.sock"]).unwrap();
        match cli.command {
            Commands::Serve { socket } => assert_eq!(socket, Some(PathBuf::from("/tmp/x.sock"))),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_exec_with_params_and_uploads() {
        let cli = Cli::try_parse_from([
            "filedeck", "exec", "upload", "-p", "path=/docs/", "--upload", "a.txt", "-u", "b.png",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec(args) => {
                assert_eq!(args.action, "upload");
                assert_eq!(args.params, vec![("path".to_string(), "/docs/".to_string())]);
                assert_eq!(args.uploads.len(), 2);
                assert!(args.output.is_none());
            }
            _ => panic!("Expected Exec command"),
        }
    }

    #[test]
    fn test_call_with_output() {
        let cli = Cli::try_parse_from([
            "filedeck", "call", "download", "--param", "path=/a.txt", "-o", "out.txt",
        ])
        .unwrap();
        match cli.command {
            Commands::Call { action, socket } => {
                assert_eq!(action.action, "download");
                assert_eq!(action.output, Some(PathBuf::from("out.txt")));
                assert!(socket.is_none());
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_param_value_may_contain_equals() {
        assert_eq!(
            parse_key_val("content=a=b").unwrap(),
            ("content".to_string(), "a=b".to_string())
        );
    }

    #[test]
    fn test_malformed_param_fails() {
        let result = Cli::try_parse_from(["filedeck", "exec", "getfile", "-p", "path"]);
        assert!(result.is_err());
        let result = Cli::try_parse_from(["filedeck", "exec", "getfile", "-p", "=x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["filedeck", "-v", "-c", "/etc/filedeck.toml", "config"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/filedeck.toml")));
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["filedeck"]).is_err());
    }

    #[test]
    fn test_exec_requires_action() {
        assert!(Cli::try_parse_from(["filedeck", "exec"]).is_err());
    }

    #[test]
    fn test_build_request_sets_mode_and_content_type() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("photo.png");
        std::fs::write(&file, b"png").unwrap();

        let args = ActionArgs {
            action: "upload".to_string(),
            params: vec![("path".to_string(), "/".to_string())],
            uploads: vec![file],
            output: None,
        };
        let (params, items) = build_request(&args).unwrap();
        assert_eq!(params.get("mode").map(String::as_str), Some("upload"));
        assert_eq!(params.get("path").map(String::as_str), Some("/"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].file_name, "photo.png");
        assert_eq!(items[0].content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_build_request_missing_upload_fails() {
        let args = ActionArgs {
            action: "upload".to_string(),
            params: Vec::new(),
            uploads: vec![PathBuf::from("/nonexistent/file.txt")],
            output: None,
        };
        assert!(build_request(&args).is_err());
    }

    #[test]
    fn test_sanitize_output_name() {
        assert_eq!(sanitize_output_name("docs.zip"), "docs.zip");
        assert_eq!(sanitize_output_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_output_name(".."), "download.bin");
        assert_eq!(sanitize_output_name(""), "download.bin");
    }
}
