use hauler::config::{GetObjectType, TransferConfig};
use hauler::logging::init_test_logging;
use hauler::system::{Fault, LocalFileSystem, MemoryStore, Operation};
use hauler::{Client, GetObjectInput, Options, PutObjectInput, TransferError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const MIB: usize = 1024 * 1024;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn client(store: Arc<MemoryStore>, config: TransferConfig) -> Client {
    init_test_logging();
    Client::from_parts(store, Arc::new(LocalFileSystem), Options::new(config))
}

fn config(part_size: usize, concurrency: usize) -> TransferConfig {
    TransferConfig {
        part_size_bytes: part_size as u64,
        concurrency,
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_upload_parts_complete_in_ascending_order() {
    let data = pattern(21 * MIB);
    let store = Arc::new(MemoryStore::new());
    // part 1 fails once, so parts 2 and 3 land first
    store.inject(Fault::Fail {
        operation: Operation::UploadPart,
        key: "big.bin".into(),
        error: hauler::StoreError::Network("reset".into()),
        times: 1,
    });

    let output = client(store.clone(), config(8 * MIB, 3))
        .put_object(
            PutObjectInput::from_bytes("bucket", "big.bin", data.clone()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.parts_count, 3);
    assert_eq!(store.completed_part_numbers("big.bin").unwrap(), vec![1, 2, 3]);
    assert!(store.object("bucket", "big.bin").unwrap() == data);
}

#[tokio::test]
async fn test_round_trip_twenty_mib() {
    let data = pattern(20 * MIB);
    let store = Arc::new(MemoryStore::new());
    let client = client(store.clone(), config(10 * MIB, 4));
    let cancel = CancellationToken::new();

    let put = client
        .put_object(
            PutObjectInput::from_bytes("bucket", "round.bin", data.clone()),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(put.parts_count, 2);
    assert_eq!(store.count(Operation::UploadPart), 2);

    let mut out = Vec::new();
    let get = client
        .download_object(GetObjectInput::new("bucket", "round.bin"), &mut out, &cancel)
        .await
        .unwrap();
    assert_eq!(get.bytes_written, data.len() as u64);
    assert_eq!(store.count(Operation::GetObject), 2);
    assert!(out == data);
}

#[tokio::test]
async fn test_round_trip_by_native_parts() {
    let data = pattern(18 * MIB);
    let store = Arc::new(MemoryStore::new());
    store.insert_multipart("bucket", "parts.bin", &data, 6 * MIB);

    let mut config = config(5 * MIB, 2);
    config.get_object_type = GetObjectType::Parts;
    let mut out = Vec::new();
    let output = client(store.clone(), config)
        .download_object(
            GetObjectInput::new("bucket", "parts.bin"),
            &mut out,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.parts_count, Some(3));
    assert!(out == data);
    let mut numbers: Vec<_> = store
        .get_requests()
        .iter()
        .filter_map(|r| r.part_number)
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_ranged_download_reads_only_the_span() {
    let data = pattern(12 * MIB);
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "ranged.bin", data.clone());

    let start = MIB;
    let end = 11 * MIB;
    let mut out = Vec::new();
    client(store.clone(), config(5 * MIB, 3))
        .download_object(
            GetObjectInput::new("bucket", "ranged.bin")
                .with_range(format!("bytes={}-{}", start, end - 1)),
            &mut out,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(out[..] == data[start..end]);
}

#[tokio::test]
async fn test_read_after_eof_is_stable() {
    let data = pattern(11 * MIB);
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "eof.bin", data.clone());

    let mut output = client(store.clone(), config(5 * MIB, 2))
        .get_object(GetObjectInput::new("bucket", "eof.bin"), &CancellationToken::new())
        .await
        .unwrap();
    let mut out = Vec::new();
    output.body.read_to_end(&mut out).await.unwrap();
    assert!(out == data);

    let gets = store.count(Operation::GetObject);
    let mut buf = [0u8; 16];
    for _ in 0..3 {
        assert_eq!(output.body.read(&mut buf).await.unwrap(), 0);
    }
    assert_eq!(store.count(Operation::GetObject), gets);
}

#[tokio::test]
async fn test_cancel_mid_upload_issues_abort() {
    let store = Arc::new(MemoryStore::new());
    store.inject(Fault::Delay {
        key: "cancelled.bin".into(),
        delay: Duration::from_secs(10),
    });
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
        client(store.clone(), config(5 * MIB, 2)).put_object(
            PutObjectInput::from_bytes("bucket", "cancelled.bin", pattern(20 * MIB)),
            &cancel,
        ),
    )
    .await
    .expect("cancelled upload must return promptly");

    assert!(matches!(result, Err(TransferError::Aborted)));
    assert_eq!(store.count(Operation::AbortMultipartUpload), 1);
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn test_cancel_mid_download_returns_promptly() {
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "slow.bin", pattern(20 * MIB));
    store.inject(Fault::Delay {
        key: "slow.bin".into(),
        delay: Duration::from_secs(10),
    });
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let mut sink = tokio::io::sink();
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        client(store, config(5 * MIB, 2)).download_object(
            GetObjectInput::new("bucket", "slow.bin"),
            &mut sink,
            &cancel,
        ),
    )
    .await
    .expect("cancelled download must return promptly");
    assert!(matches!(result, Err(TransferError::Aborted)));
    sink.flush().await.unwrap();
}

#[tokio::test]
async fn test_progress_listeners_see_whole_transfer() {
    let data = pattern(12 * MIB);
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "watched.bin", data.clone());

    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let last_total = Arc::new(Mutex::new(0u64));
    let client = client(store, config(5 * MIB, 3)).with_options(|o| {
        let start = log.clone();
        o.progress
            .on_transfer_start(move |e| start.lock().unwrap().push(format!("start {}", e.key)));
        let total = last_total.clone();
        o.progress.on_bytes_transferred(move |e| {
            let mut last = total.lock().unwrap();
            assert!(e.bytes_transferred >= *last);
            *last = e.bytes_transferred;
        });
        let complete = log.clone();
        o.progress.on_transfer_complete(move |e| {
            complete
                .lock()
                .unwrap()
                .push(format!("complete {}", e.bytes_transferred))
        });
    });

    let mut out = Vec::new();
    client
        .download_object(
            GetObjectInput::new("bucket", "watched.bin"),
            &mut out,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "start watched.bin".to_string(),
            format!("complete {}", data.len())
        ]
    );
    assert_eq!(*last_total.lock().unwrap(), data.len() as u64);
}

#[tokio::test]
async fn test_part_size_below_minimum_rejected_before_any_call() {
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "k", b"data".to_vec());

    let err = client(store.clone(), config(1024, 2))
        .get_object(GetObjectInput::new("bucket", "k"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::PartSizeTooSmall { .. }));
    assert!(store.operations().is_empty());
}
