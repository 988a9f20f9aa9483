//! End-to-end integration tests for Filedeck.
//!
//! These tests verify complete flows work correctly:
//! - Path containment and name exclusion
//! - Conflict, delete, upload and extract behaviour through the engine
//! - Tree summaries
//! - The socket service, including reload

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use filedeck::config::Config;
use filedeck::files::{DirectorySummarizer, NamePolicy, PathResolver};
use filedeck::ipc::{IpcClient, IpcResponse, IpcServer};
use filedeck::{ActionEngine, FileService, Stage};
use protocol::{
    Action, ActionOutcome, ActionRequest, ActionResult, ErrorKind, FileRecord, MessageKey,
    Payload, UploadItem,
};
use tempfile::TempDir;

/// Create a test configuration rooted in a temporary directory.
fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.options.doc_root = temp_dir.path().join("root");
    (config, temp_dir)
}

fn create_engine() -> (ActionEngine, TempDir) {
    let (config, temp_dir) = create_test_config();
    (ActionEngine::new(&config).unwrap(), temp_dir)
}

fn request(action: Action, params: &[(&str, &str)]) -> ActionRequest {
    params
        .iter()
        .fold(ActionRequest::new(action), |r, (k, v)| r.with_param(*k, *v))
}

fn record(outcome: ActionOutcome) -> FileRecord {
    match outcome {
        ActionOutcome::Json(ActionResult::Data(Payload::Record(r))) => r,
        other => panic!("Expected a record, got {:?}", other),
    }
}

fn write(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

// =============================================================================
// Path Containment Tests
// =============================================================================

#[test]
fn test_resolver_never_leaves_doc_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("root");
    fs::create_dir_all(root.join("a/b")).unwrap();
    let resolver = PathResolver::new(&root).unwrap();

    let candidates = [
        "..",
        "../..",
        "/../../etc/passwd",
        "a/../../b",
        "a/b/../../../x",
        "./././..",
        "a/./b/..",
        "~/x",
        "~root/.ssh",
        "C:\\Windows",
        "\\\\server\\share",
        "/etc/passwd",
        "a\\..\\..\\x",
    ];

    for raw in candidates {
        if let Ok(resolved) = resolver.resolve(raw) {
            assert!(
                resolved.path.starts_with(resolver.root()),
                "{} resolved outside the doc root: {}",
                raw,
                resolved.path.display()
            );
        }
    }
}

#[test]
fn test_absolute_doc_root_prefix_only_when_allowed() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("root");
    fs::create_dir_all(root.join("docs")).unwrap();
    let canonical = fs::canonicalize(&root).unwrap();
    let absolute = format!("{}/docs", canonical.display());

    let strict = PathResolver::new(&root).unwrap();
    let resolved = strict.resolve(&absolute).unwrap();
    assert!(resolved.path.starts_with(strict.root()));
    assert_ne!(resolved.path, canonical.join("docs"));

    let lenient = PathResolver::new(&root).unwrap().allow_absolute(true);
    assert_eq!(lenient.resolve(&absolute).unwrap().path, canonical.join("docs"));
}

// =============================================================================
// Name Policy Tests
// =============================================================================

#[test]
fn test_exclusion_round_trip() {
    let names = ["build", "notes.txt", "secret.key"];

    for name in names {
        for is_dir in [true, false] {
            let open = NamePolicy::new(&[], "", &[], "").unwrap();
            assert!(open.is_allowed_name(name, is_dir));

            let listed = vec![name.to_string()];
            let closed = if is_dir {
                NamePolicy::new(&listed, "", &[], "").unwrap()
            } else {
                NamePolicy::new(&[], "", &listed, "").unwrap()
            };
            assert!(!closed.is_allowed_name(name, is_dir));
            assert!(closed.is_allowed_name(name, !is_dir));
        }
    }
}

#[test]
fn test_exclusion_regex_matches_kind() {
    let policy = NamePolicy::new(&[], r"^\.", &[], r"\.(bak|tmp)$").unwrap();

    assert!(!policy.is_allowed_name(".git", true));
    assert!(policy.is_allowed_name(".gitignore", false));
    assert!(!policy.is_allowed_name("draft.bak", false));
    assert!(policy.is_allowed_name("draft.bak", true));
}

#[test]
fn test_invalid_exclusion_regex_rejected() {
    assert!(NamePolicy::new(&[], "(", &[], "").is_err());
    assert!(NamePolicy::new(&[], "", &[], "[a-").is_err());
}

// =============================================================================
// Engine Flow Tests
// =============================================================================

#[test]
fn test_move_scenario() {
    let (engine, _temp_dir) = create_engine();
    let root = engine.doc_root().to_path_buf();
    write(&root, "a/b.txt", b"0123456789");
    fs::create_dir_all(root.join("c")).unwrap();

    let moved = record(
        engine
            .run(&request(Action::Move, &[("old", "/a/b.txt"), ("new", "/c/")]))
            .unwrap(),
    );

    assert_eq!(moved.id, "/c/b.txt");
    assert!(!root.join("a/b.txt").exists());
    assert_eq!(fs::read(root.join("c/b.txt")).unwrap(), b"0123456789");
}

#[test]
fn test_add_folder_traversal_scenario() {
    let (engine, temp_dir) = create_engine();

    let err = engine
        .run(&request(Action::AddFolder, &[("path", "/"), ("name", "../evil")]))
        .unwrap_err();

    assert_eq!(err.message_key(), MessageKey::UnableToCreateDirectory);
    assert!(!temp_dir.path().join("evil").exists());
    assert_eq!(fs::read_dir(engine.doc_root()).unwrap().count(), 0);
}

#[test]
fn test_no_silent_overwrite_on_conflict() {
    let (engine, _temp_dir) = create_engine();
    let root = engine.doc_root().to_path_buf();
    write(&root, "src.txt", b"new");
    write(&root, "dest/src.txt", b"old");
    write(&root, "folder/inner.txt", b"x");
    fs::create_dir_all(root.join("dest/folder")).unwrap();

    let file_conflict = engine
        .run(&request(Action::Copy, &[("source", "/src.txt"), ("target", "/dest/")]))
        .unwrap_err();
    assert_eq!(file_conflict.kind(), ErrorKind::Conflict);
    assert_eq!(file_conflict.message_key(), MessageKey::FileAlreadyExists);

    let dir_conflict = engine
        .run(&request(Action::Move, &[("old", "/folder/"), ("new", "/dest/")]))
        .unwrap_err();
    assert_eq!(dir_conflict.message_key(), MessageKey::DirectoryAlreadyExists);

    let rename_conflict = engine
        .run(&request(Action::Rename, &[("old", "/folder/"), ("new", "dest")]))
        .unwrap_err();
    assert_eq!(rename_conflict.stage(), Stage::Conflict);
    assert_eq!(rename_conflict.message_key(), MessageKey::DirectoryAlreadyExists);

    assert_eq!(fs::read(root.join("dest/src.txt")).unwrap(), b"old");
    assert!(root.join("folder/inner.txt").exists());
}

#[test]
fn test_delete_directory_removes_descendants() {
    let (engine, _temp_dir) = create_engine();
    let root = engine.doc_root().to_path_buf();
    write(&root, "tree/a.txt", b"a");
    write(&root, "tree/sub/b.txt", b"b");
    write(&root, "tree/sub/deeper/c.txt", b"c");

    engine.run(&request(Action::Delete, &[("path", "/tree/")])).unwrap();
    assert!(!root.join("tree").exists());

    for path in ["/tree/", "/tree/sub/"] {
        let err = engine.run(&request(Action::GetFolder, &[("path", path)])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    let err = engine
        .run(&request(Action::GetFile, &[("path", "/tree/sub/b.txt")]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_upload_collision_keeps_both_files() {
    let (engine, _temp_dir) = create_engine();
    let root = engine.doc_root().to_path_buf();
    write(&root, "report.txt", b"first");

    let upload = request(Action::Upload, &[("path", "/")])
        .with_item(UploadItem::new("report.txt", "text/plain", b"second".to_vec()));
    let outcome = engine.run(&upload).unwrap();
    let ActionOutcome::Json(ActionResult::Data(Payload::Records(records))) = outcome else {
        panic!("Expected records");
    };

    assert_eq!(records.len(), 1);
    assert_ne!(records[0].name, "report.txt");
    assert_eq!(fs::read(root.join("report.txt")).unwrap(), b"first");
    assert_eq!(fs::read(root.join(&records[0].name)).unwrap(), b"second");
}

#[test]
fn test_summary_counts_unsized_entries() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write(root, "ten.txt", &[b'x'; 10]);
    write(root, "nested/twenty.txt", &[b'y'; 20]);
    std::os::unix::fs::symlink(root.join("missing"), root.join("broken.txt")).unwrap();

    let summary = DirectorySummarizer::default().walk(root, |_, _| true);

    assert_eq!(summary.file_count, 3);
    assert_eq!(summary.folder_count, 1);
    assert_eq!(summary.total_size_bytes, 30);
}

#[test]
fn test_engine_summarize_with_dangling_link() {
    let (engine, _temp_dir) = create_engine();
    let root = engine.doc_root().to_path_buf();
    write(&root, "ten.txt", &[b'x'; 10]);
    write(&root, "nested/twenty.txt", &[b'y'; 20]);
    std::os::unix::fs::symlink(root.join("missing"), root.join("broken.txt")).unwrap();

    let outcome = engine.run(&ActionRequest::new(Action::Summarize)).unwrap();
    let ActionOutcome::Json(ActionResult::Data(Payload::Summary(summary))) = outcome else {
        panic!("Expected a summary");
    };

    assert_eq!(summary.file_count, 3);
    assert_eq!(summary.total_size_bytes, 30);
}

#[test]
#[cfg(unix)]
fn test_extract_cannot_leave_doc_root() {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let (engine, temp_dir) = create_engine();
    let root = engine.doc_root().to_path_buf();
    let outside = temp_dir.path().join("outside");
    fs::create_dir_all(&outside).unwrap();
    fs::create_dir_all(root.join("out")).unwrap();
    std::os::unix::fs::symlink(&outside, root.join("out/link")).unwrap();

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, bytes) in [
        ("../../escape.txt", b"up".as_slice()),
        ("link/through.txt", b"link".as_slice()),
        ("safe/kept.txt", b"kept".as_slice()),
    ] {
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(bytes).unwrap();
    }
    let archive = writer.finish().unwrap().into_inner();
    write(&root, "in.zip", &archive);

    let outcome = engine
        .run(&request(Action::Extract, &[("source", "/in.zip"), ("target", "/out")]))
        .unwrap();
    let ActionOutcome::Json(ActionResult::Data(Payload::Records(records))) = outcome else {
        panic!("Expected records");
    };

    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["/out/safe/"]);
    assert_eq!(fs::read(root.join("out/safe/kept.txt")).unwrap(), b"kept");
    assert_eq!(fs::read_dir(&outside).unwrap().count(), 0);
    assert!(!temp_dir.path().join("escape.txt").exists());
    assert!(!root.join("escape.txt").exists());
}

#[test]
fn test_errors_never_escape_execute() {
    let (engine, _temp_dir) = create_engine();

    let cases = [
        request(Action::GetFile, &[("path", "~/x")]),
        request(Action::GetFolder, &[("path", "/missing/")]),
        request(Action::Rename, &[("old", "/")]),
        request(Action::Upload, &[("path", "/")]),
        ActionRequest::new(Action::Download),
    ];

    for case in cases {
        match engine.execute(&case) {
            ActionOutcome::Json(ActionResult::Errors(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(!errors[0].message.is_empty());
            }
            other => panic!("Expected an error envelope for {:?}, got {:?}", case.action, other),
        }
    }
}

// =============================================================================
// Socket Service Tests
// =============================================================================

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn start_service(
    config_path: PathBuf,
    socket_path: &Path,
) -> (
    tokio::sync::oneshot::Sender<()>,
    tokio::task::JoinHandle<anyhow::Result<()>>,
) {
    let mut config = Config::load(&config_path).unwrap();
    config.apply_env_overrides();
    let engine = ActionEngine::new(&config).unwrap();
    let server = IpcServer::bind(socket_path).await.unwrap();
    let service = Arc::new(FileService::new(engine, Some(config_path)));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(service.serve(server, async move {
        let _ = shutdown_rx.await;
    }));
    (shutdown_tx, handle)
}

#[tokio::test]
async fn test_service_roundtrip() {
    let (config, temp_dir) = create_test_config();
    let config_path = temp_dir.path().join("config.toml");
    config.save(&config_path).unwrap();
    let socket_path = temp_dir.path().join("run").join("daemon.sock");

    let (shutdown_tx, handle) = start_service(config_path, &socket_path).await;
    let mut client = IpcClient::connect(&socket_path).await.unwrap();

    assert!(client.ping().await.unwrap());

    let response = client
        .execute(
            params(&[("mode", "upload"), ("path", "/")]),
            vec![UploadItem::new("hello.txt", "text/plain", b"hello".to_vec())],
        )
        .await
        .unwrap();
    match response {
        IpcResponse::Json { body } => {
            assert_eq!(body["data"][0]["id"], "/hello.txt");
            assert_eq!(body["data"][0]["attributes"]["size"], 5);
        }
        other => panic!("Expected Json response, got {:?}", other),
    }

    let response = client
        .execute(params(&[("mode", "download"), ("path", "/hello.txt")]), Vec::new())
        .await
        .unwrap();
    match response {
        IpcResponse::Binary(payload) => {
            assert_eq!(payload.file_name, "hello.txt");
            assert_eq!(payload.data, b"hello");
        }
        other => panic!("Expected Binary response, got {:?}", other),
    }

    let response = client
        .execute(params(&[("mode", "explode")]), Vec::new())
        .await
        .unwrap();
    match response {
        IpcResponse::Json { body } => {
            assert_eq!(body["errors"][0]["title"], "MODE_ERROR");
            assert_eq!(body["errors"][0]["code"], 400);
        }
        other => panic!("Expected Json response, got {:?}", other),
    }

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_service_reload_applies_new_policy() {
    let (mut config, temp_dir) = create_test_config();
    let config_path = temp_dir.path().join("config.toml");
    config.save(&config_path).unwrap();
    let socket_path = temp_dir.path().join("daemon.sock");

    let (shutdown_tx, handle) = start_service(config_path.clone(), &socket_path).await;
    let mut client = IpcClient::connect(&socket_path).await.unwrap();

    let add = params(&[("mode", "addfolder"), ("path", "/"), ("name", "first")]);
    match client.execute(add, Vec::new()).await.unwrap() {
        IpcResponse::Json { body } => assert_eq!(body["data"]["id"], "/first/"),
        other => panic!("Expected Json response, got {:?}", other),
    }

    config.security.read_only = true;
    config.save(&config_path).unwrap();
    client.reload().await.unwrap();

    let add = params(&[("mode", "addfolder"), ("path", "/"), ("name", "second")]);
    match client.execute(add, Vec::new()).await.unwrap() {
        IpcResponse::Json { body } => {
            assert_eq!(body["errors"][0]["id"], "permission_denied");
        }
        other => panic!("Expected Json response, got {:?}", other),
    }
    assert!(!temp_dir.path().join("root/second").exists());

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_service_answers_after_malformed_line() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let (config, temp_dir) = create_test_config();
    let config_path = temp_dir.path().join("config.toml");
    config.save(&config_path).unwrap();
    let socket_path = temp_dir.path().join("daemon.sock");

    let (shutdown_tx, handle) = start_service(config_path, &socket_path).await;

    let stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"{not json}\n\"Ping\"\n").await.unwrap();
    write_half.flush().await.unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let first: IpcResponse = serde_json::from_str(line.trim()).unwrap();
    assert!(matches!(first, IpcResponse::Error { .. }));

    line.clear();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .unwrap()
        .unwrap();
    let second: IpcResponse = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(second, IpcResponse::Pong);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
