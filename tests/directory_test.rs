use hauler::config::TransferConfig;
use hauler::logging::init_test_logging;
use hauler::system::{Fault, LocalFileSystem, MemoryStore, Operation};
use hauler::{
    BufferPool, Client, DownloadDirectoryInput, IgnorePolicy, Options, StoreError, TransferError,
    UploadDirectoryInput,
};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn client(store: Arc<MemoryStore>) -> Client {
    init_test_logging();
    let options = Options::new(TransferConfig {
        directory_concurrency: 2,
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 10,
        ..Default::default()
    });
    Client::from_parts(store, Arc::new(LocalFileSystem), options)
}

fn five_files() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for i in 1..=5 {
        fs::write(dir.path().join(format!("file{}.txt", i)), format!("contents {}", i)).unwrap();
    }
    dir
}

fn fail_puts(store: &MemoryStore, keys: &[&str]) {
    for key in keys {
        store.inject(Fault::Fail {
            operation: Operation::PutObject,
            key: key.to_string(),
            error: StoreError::AccessDenied("denied".into()),
            times: u32::MAX,
        });
    }
}

#[tokio::test]
async fn test_ignore_policy_absorbs_failures() {
    let dir = five_files();
    let store = Arc::new(MemoryStore::new());
    fail_puts(&store, &["file2.txt", "file4.txt"]);

    let output = client(store.clone())
        .upload_directory(
            UploadDirectoryInput::new("bucket", dir.path()).with_failure_policy(IgnorePolicy),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.objects_transferred, 3);
    assert_eq!(output.objects_failed, 2);
    assert_eq!(
        store.keys("bucket"),
        vec!["file1.txt", "file3.txt", "file5.txt"]
    );
}

#[tokio::test]
async fn test_terminate_policy_returns_item_error() {
    let dir = five_files();
    let store = Arc::new(MemoryStore::new());
    fail_puts(&store, &["file2.txt", "file4.txt"]);

    let err = client(store.clone())
        .upload_directory(
            UploadDirectoryInput::new("bucket", dir.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match &err {
        TransferError::ItemFailed { item, .. } => {
            assert!(item == "file2.txt" || item == "file4.txt", "unexpected item {}", item)
        }
        other => panic!("expected ItemFailed, got {:?}", other),
    }
    assert!(matches!(
        err.root_cause(),
        TransferError::TransferFailed {
            cause: StoreError::AccessDenied(_)
        }
    ));
    assert!(store.keys("bucket").len() <= 3);
}

#[tokio::test]
async fn test_terminate_lets_in_flight_items_finish() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"fails").unwrap();
    fs::write(dir.path().join("b.txt"), b"slow but fine").unwrap();

    let store = Arc::new(MemoryStore::new());
    // both items are running by the time a.txt fails
    store.inject(Fault::Delay {
        key: "a.txt".into(),
        delay: Duration::from_millis(100),
    });
    fail_puts(&store, &["a.txt"]);
    store.inject(Fault::Delay {
        key: "b.txt".into(),
        delay: Duration::from_millis(400),
    });

    let err = client(store.clone())
        .upload_directory(
            UploadDirectoryInput::new("bucket", dir.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(&err, TransferError::ItemFailed { item, .. } if item == "a.txt"));
    assert_eq!(store.keys("bucket"), vec!["b.txt"]);
}

#[tokio::test]
async fn test_concurrent_uploads_with_shared_pool() {
    let dir = tempfile::tempdir().unwrap();
    let data: Vec<u8> = (0..20 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    for i in 0..4 {
        fs::write(dir.path().join(format!("big{}.bin", i)), &data).unwrap();
    }

    let store = Arc::new(MemoryStore::new());
    let pool = BufferPool::new(3, 8 * 1024 * 1024);
    let client = client(store.clone()).with_options(|o| {
        o.config.directory_concurrency = 4;
        o.buffer_pool = Some(pool.clone());
    });

    let output = tokio::time::timeout(
        Duration::from_secs(20),
        client.upload_directory(
            UploadDirectoryInput::new("bucket", dir.path()),
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("uploads sharing one pool must not stall")
    .unwrap();

    assert_eq!(output.objects_transferred, 4);
    assert_eq!(store.keys("bucket").len(), 4);
    assert_eq!(pool.available(), pool.capacity());
}

#[tokio::test]
async fn test_escaping_key_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "reports/../../outside.txt", b"nope".to_vec());
    let root = tempfile::tempdir().unwrap();
    let destination = root.path().join("dest");

    let err = client(store.clone())
        .download_directory(
            DownloadDirectoryInput::new("bucket", &destination).with_key_prefix("reports"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::PathEscapesDestination { .. }));
    assert!(!root.path().join("outside.txt").exists());
    assert_eq!(store.count(Operation::GetObject), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_back_into_tree_is_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("a")).unwrap();
    fs::write(dir.path().join("a/data.txt"), b"x").unwrap();
    std::os::unix::fs::symlink(dir.path().join("a"), dir.path().join("a/back")).unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client(Arc::new(MemoryStore::new())).upload_directory(
            UploadDirectoryInput::new("bucket", dir.path())
                .recursive(true)
                .follow_symbolic_links(true),
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("walk over a symlink cycle must terminate");

    let err = result.unwrap_err();
    assert!(matches!(err, TransferError::DuplicatePath(_)));
    assert!(err.to_string().starts_with("traversed duplicate path"));
}

#[tokio::test]
async fn test_upload_then_download_tree() {
    let source = tempfile::tempdir().unwrap();
    fs::create_dir_all(source.path().join("nested/deeper")).unwrap();
    fs::write(source.path().join("root.txt"), b"root").unwrap();
    fs::write(source.path().join("nested/mid.txt"), b"middle").unwrap();
    fs::write(source.path().join("nested/deeper/leaf.txt"), b"leaf").unwrap();

    let store = Arc::new(MemoryStore::new());
    let client = client(store.clone());
    let cancel = CancellationToken::new();

    let up = client
        .upload_directory(
            UploadDirectoryInput::new("bucket", source.path())
                .recursive(true)
                .with_key_prefix("backup"),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(up.objects_transferred, 3);

    let dest = tempfile::tempdir().unwrap();
    let down = client
        .download_directory(
            DownloadDirectoryInput::new("bucket", dest.path()).with_key_prefix("backup"),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(down.objects_transferred, 3);
    assert_eq!(down.bytes_transferred, up.bytes_transferred);
    assert_eq!(fs::read(dest.path().join("root.txt")).unwrap(), b"root");
    assert_eq!(fs::read(dest.path().join("nested/mid.txt")).unwrap(), b"middle");
    assert_eq!(
        fs::read(dest.path().join("nested/deeper/leaf.txt")).unwrap(),
        b"leaf"
    );
}

#[tokio::test]
async fn test_directory_events_one_start_one_terminal() {
    let dir = five_files();
    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(Mutex::new(Vec::<String>::new()));

    let client = client(store).with_options(|o| {
        let log = events.clone();
        o.directory_progress
            .on_directory_start(move |_| log.lock().unwrap().push("start".into()));
        let log = events.clone();
        o.directory_progress
            .on_objects_transferred(move |_| log.lock().unwrap().push("object".into()));
        let log = events.clone();
        o.directory_progress.on_directory_complete(move |e| {
            log.lock()
                .unwrap()
                .push(format!("complete {}", e.objects_transferred))
        });
        let log = events.clone();
        o.directory_progress
            .on_directory_failed(move |_| log.lock().unwrap().push("failed".into()));
    });

    client
        .upload_directory(
            UploadDirectoryInput::new("bucket", dir.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.first().map(String::as_str), Some("start"));
    assert_eq!(events.last().map(String::as_str), Some("complete 5"));
    assert_eq!(events.iter().filter(|e| *e == "object").count(), 5);
    assert!(!events.iter().any(|e| e == "failed"));
}

#[tokio::test]
async fn test_cancelled_directory_upload_is_aborted() {
    let dir = five_files();
    let store = Arc::new(MemoryStore::new());
    for i in 1..=5 {
        store.inject(Fault::Delay {
            key: format!("file{}.txt", i),
            delay: Duration::from_secs(10),
        });
    }
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        client(store.clone())
            .upload_directory(UploadDirectoryInput::new("bucket", dir.path()), &cancel),
    )
    .await
    .expect("cancelled directory upload must return promptly");

    assert!(matches!(result, Err(TransferError::Aborted)));
    assert!(store.keys("bucket").is_empty());
}
