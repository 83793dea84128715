//! Export client against an in-memory export server.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use cps_client::export::{
    ExportClient, ExportFile, ExportHeader, ExportRequest, ExportResponse, ExportSink,
    ExportStatus, MemorySink, EXPORT_HEADER_SIZE, HASH_SIZE,
};
use cps_client::{CpsError, ErrorKind, Result};
use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;

const CHUNK: usize = 64 * 1024;

async fn read_request(stream: &mut DuplexStream) -> ExportRequest {
    let mut buf = vec![0u8; EXPORT_HEADER_SIZE];
    stream.read_exact(&mut buf).await.unwrap();
    for _ in 0..2 {
        let len = stream.read_u16_le().await.unwrap();
        let mut name = vec![0u8; len as usize];
        stream.read_exact(&mut name).await.unwrap();
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&name);
    }
    let offset = stream.read_u64_le().await.unwrap();
    buf.extend_from_slice(&offset.to_le_bytes());
    ExportRequest::decode(&mut &buf[..]).unwrap()
}

async fn send_file(stream: &mut DuplexStream, request: &ExportRequest, data: &[u8]) {
    let response = ExportResponse::success(request.header, data.len() as u64);
    stream.write_all(&response.encode()).await.unwrap();
    stream.write_all(data).await.unwrap();
    stream.write_all(&*Md5::digest(data)).await.unwrap();
    stream.flush().await.unwrap();
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Start(String, String),
    Data(usize),
    Finish(bool),
}

/// Records every sink call and checks hashes.
struct RecordingSink {
    events: Arc<Mutex<Vec<Event>>>,
    hasher: Md5,
    done: Option<oneshot::Sender<Result<()>>>,
}

impl RecordingSink {
    fn new() -> (Self, Arc<Mutex<Vec<Event>>>, oneshot::Receiver<Result<()>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            events: events.clone(),
            hasher: Md5::new(),
            done: Some(tx),
        };
        (sink, events, rx)
    }
}

impl ExportSink for RecordingSink {
    fn start_file(&mut self, take_name: &str, file: &ExportFile) -> Result<()> {
        self.hasher = Md5::new();
        self.events
            .lock()
            .unwrap()
            .push(Event::Start(take_name.to_string(), file.name.clone()));
        Ok(())
    }

    fn process_data(&mut self, data: &[u8]) -> Result<()> {
        self.hasher.update(data);
        self.events.lock().unwrap().push(Event::Data(data.len()));
        Ok(())
    }

    fn finish_file(&mut self, _: &str, _: &ExportFile, hash: &[u8; HASH_SIZE]) -> bool {
        let hasher = std::mem::replace(&mut self.hasher, Md5::new());
        let matches = hasher.finalize().as_slice() == hash;
        self.events.lock().unwrap().push(Event::Finish(matches));
        matches
    }

    fn finalize(mut self: Box<Self>, result: Result<()>) {
        if let Some(tx) = self.done.take() {
            let _ = tx.send(result);
        }
    }
}

async fn outcome<T>(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("sink was never finalized")
        .expect("sink dropped without finalize")
}

async fn wait_idle(client: &ExportClient) {
    for _ in 0..200 {
        if client.is_idle() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("export client never became idle");
}

#[tokio::test]
async fn test_file_is_delivered_in_chunks() {
    let (connector, mut servers) = DuplexConnector::new();
    let client = ExportClient::builder().connector(connector).build("device", 9000);
    let data = payload(150_000);

    let (sink, events, done) = RecordingSink::new();
    client
        .export_take_files("slate_1", vec![ExportFile::new("clip.mov", 150_000)], sink)
        .unwrap();

    let mut server = servers.recv().await.unwrap();
    let request = read_request(&mut server).await;
    assert_eq!(request.take_name, "slate_1");
    assert_eq!(request.file_name, "clip.mov");
    assert_eq!(request.offset, 0);
    assert_eq!(request.header.version, 1);

    let server_task = tokio::spawn(async move {
        send_file(&mut server, &request, &data).await;
        server
    });

    outcome(done).await.unwrap();
    let _server = server_task.await.unwrap();

    let events = events.lock().unwrap().clone();
    let chunks: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::Data(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(chunks.len(), 150_000usize.div_ceil(CHUNK));
    assert!(chunks.iter().all(|n| *n <= CHUNK));
    assert_eq!(chunks.iter().sum::<usize>(), 150_000);
    assert_eq!(
        events.first(),
        Some(&Event::Start("slate_1".into(), "clip.mov".into()))
    );
    assert_eq!(events.last(), Some(&Event::Finish(true)));
    assert_eq!(
        events.iter().filter(|e| matches!(e, Event::Finish(_))).count(),
        1
    );
}

#[tokio::test]
async fn test_multi_take_export_matches_by_transaction() {
    let (connector, mut servers) = DuplexConnector::new();
    let client = ExportClient::builder().connector(connector).build("device", 9000);

    let (sink, done) = MemorySink::channel();
    client
        .export_files(
            vec![
                ("take_a".into(), vec![ExportFile::new("a.wav", 10)]),
                (
                    "take_b".into(),
                    vec![ExportFile::new("b.mov", 20).with_offset(5)],
                ),
            ],
            sink,
        )
        .unwrap();

    let mut server = servers.recv().await.unwrap();
    let first = read_request(&mut server).await;
    let second = read_request(&mut server).await;
    assert_eq!(first.take_name, "take_a");
    assert_eq!(second.take_name, "take_b");
    assert_eq!(second.offset, 5);
    assert_ne!(first.header.transaction_id, second.header.transaction_id);

    // Served in reverse request order.
    send_file(&mut server, &second, &payload(20)).await;
    send_file(&mut server, &first, &payload(10)).await;

    let files = outcome(done).await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].take_name, "take_b");
    assert_eq!(files[0].data, payload(20));
    assert_eq!(files[1].take_name, "take_a");
    assert_eq!(files[1].file_name, "a.wav");
}

#[tokio::test]
async fn test_hash_mismatch_fails_task() {
    let (connector, mut servers) = DuplexConnector::new();
    let client = ExportClient::builder().connector(connector).build("device", 9000);

    let (sink, events, done) = RecordingSink::new();
    client
        .export_take_files("t", vec![ExportFile::new("f.bin", 4)], sink)
        .unwrap();

    let mut server = servers.recv().await.unwrap();
    let request = read_request(&mut server).await;
    let response = ExportResponse::success(request.header, 4);
    server.write_all(&response.encode()).await.unwrap();
    server.write_all(b"data").await.unwrap();
    server.write_all(&[0u8; HASH_SIZE]).await.unwrap();

    let err = outcome(done).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Application);
    match err {
        CpsError::HashMismatch { take, file } => {
            assert_eq!(take, "t");
            assert_eq!(file, "f.bin");
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(events.lock().unwrap().last(), Some(&Event::Finish(false)));
}

#[tokio::test]
async fn test_error_status_without_length_then_reconnect() {
    let (connector, mut servers) = DuplexConnector::new();
    let client = ExportClient::builder().connector(connector).build("device", 9000);

    let (sink, done) = MemorySink::channel();
    client
        .export_take_files("t", vec![ExportFile::new("missing.bin", 1)], sink)
        .unwrap();

    let mut server = servers.recv().await.unwrap();
    let request = read_request(&mut server).await;
    let response = ExportResponse::failure(request.header, ExportStatus::ServerError);
    assert_eq!(response.encode().len(), EXPORT_HEADER_SIZE + 1);
    server.write_all(&response.encode()).await.unwrap();

    assert!(matches!(
        outcome(done).await,
        Err(CpsError::ExportStatus(ExportStatus::ServerError))
    ));

    // The failed connection is dropped; the next task dials again.
    let (sink, done) = MemorySink::channel();
    client
        .export_take_files("t", vec![ExportFile::new("ok.bin", 3)], sink)
        .unwrap();
    let mut server = servers.recv().await.unwrap();
    let request = read_request(&mut server).await;
    send_file(&mut server, &request, b"abc").await;
    assert_eq!(outcome(done).await.unwrap()[0].data, b"abc");
}

#[tokio::test]
async fn test_unknown_transaction_fails_task() {
    let (connector, mut servers) = DuplexConnector::new();
    let client = ExportClient::builder().connector(connector).build("device", 9000);

    let (sink, done) = MemorySink::channel();
    client
        .export_take_files("t", vec![ExportFile::new("f", 1)], sink)
        .unwrap();

    let mut server = servers.recv().await.unwrap();
    let request = read_request(&mut server).await;
    let stray = ExportHeader::new(1, request.header.transaction_id.wrapping_add(1));
    send_file(
        &mut server,
        &ExportRequest::new(stray, "t", "f", 0),
        b"x",
    )
    .await;

    match outcome(done).await {
        Err(CpsError::UnknownTransaction(id)) => {
            assert_eq!(id, request.header.transaction_id.wrapping_add(1))
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_failure_fails_task() {
    let client = ExportClient::builder()
        .connector(RefusingConnector)
        .build("device", 9000);

    let (sink, done) = MemorySink::channel();
    client
        .export_take_files("t", vec![ExportFile::new("f", 1)], sink)
        .unwrap();

    let err = outcome(done).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn test_abort_all_finalizes_every_task() {
    let (connector, mut servers) = DuplexConnector::new();
    let client = ExportClient::builder().connector(connector).build("device", 9000);

    let (sink, running) = MemorySink::channel();
    client
        .export_take_files("t", vec![ExportFile::new("slow", 1)], sink)
        .unwrap();
    let mut server = servers.recv().await.unwrap();
    read_request(&mut server).await;

    let mut queued = Vec::new();
    for i in 0..3 {
        let (sink, done) = MemorySink::channel();
        client
            .export_take_files("t", vec![ExportFile::new(format!("f{}", i), 1)], sink)
            .unwrap();
        queued.push(done);
    }
    assert_eq!(client.queued_tasks(), 3);

    assert_eq!(client.abort_all_exports(), 3);
    for done in queued {
        assert!(matches!(outcome(done).await, Err(CpsError::Aborted)));
    }
    assert!(matches!(outcome(running).await, Err(CpsError::Aborted)));
    assert_eq!(client.queued_tasks(), 0);
}

#[tokio::test]
async fn test_abort_single_task() {
    let (connector, mut servers) = DuplexConnector::new();
    let client = ExportClient::builder().connector(connector).build("device", 9000);

    let (sink, first) = MemorySink::channel();
    let first_id = client
        .export_take_files("t", vec![ExportFile::new("a", 1)], sink)
        .unwrap();
    let mut server = servers.recv().await.unwrap();
    let request = read_request(&mut server).await;

    let (sink, second) = MemorySink::channel();
    let second_id = client
        .export_take_files("t", vec![ExportFile::new("b", 1)], sink)
        .unwrap();
    assert_ne!(first_id, second_id);

    assert!(client.abort_export(second_id));
    assert!(matches!(outcome(second).await, Err(CpsError::Aborted)));
    assert!(!client.abort_export(second_id));

    send_file(&mut server, &request, b"a").await;
    assert_eq!(outcome(first).await.unwrap()[0].data, b"a");
    wait_idle(&client).await;
    assert!(!client.abort_export(first_id));
}

#[tokio::test]
async fn test_queue_full_finalizes_rejected_sink() {
    let (connector, mut servers) = DuplexConnector::new();
    let client = ExportClient::builder()
        .connector(connector)
        .queue_capacity(1)
        .build("device", 9000);

    let (sink, _running) = MemorySink::channel();
    client
        .export_take_files("t", vec![ExportFile::new("a", 1)], sink)
        .unwrap();
    let mut server = servers.recv().await.unwrap();
    read_request(&mut server).await;

    let (sink, _queued) = MemorySink::channel();
    client
        .export_take_files("t", vec![ExportFile::new("b", 1)], sink)
        .unwrap();

    let (sink, rejected) = MemorySink::channel();
    let err = client
        .export_take_files("t", vec![ExportFile::new("c", 1)], sink)
        .unwrap_err();
    assert!(matches!(err, CpsError::QueueFull));
    assert!(matches!(outcome(rejected).await, Err(CpsError::QueueFull)));
}

#[tokio::test]
async fn test_connection_is_reused_while_tasks_wait() {
    let (connector, mut servers) = DuplexConnector::new();
    let client = ExportClient::builder().connector(connector).build("device", 9000);

    let (sink, first) = MemorySink::channel();
    client
        .export_take_files("t", vec![ExportFile::new("a", 2)], sink)
        .unwrap();
    let (sink, second) = MemorySink::channel();
    client
        .export_take_files("t", vec![ExportFile::new("b", 2)], sink)
        .unwrap();

    let mut server = servers.recv().await.unwrap();
    let request = read_request(&mut server).await;
    send_file(&mut server, &request, b"aa").await;
    let request = read_request(&mut server).await;
    assert_eq!(request.file_name, "b");
    send_file(&mut server, &request, b"bb").await;

    assert_eq!(outcome(first).await.unwrap()[0].data, b"aa");
    assert_eq!(outcome(second).await.unwrap()[0].data, b"bb");
    assert!(servers.try_recv().is_err());
}

#[tokio::test]
async fn test_shutdown_rejects_new_tasks() {
    let (connector, _servers) = DuplexConnector::new();
    let client = ExportClient::builder().connector(connector).build("device", 9000);

    client.shutdown().await;
    client.shutdown().await;
    assert!(client.is_idle());

    let (sink, done) = MemorySink::channel();
    assert!(matches!(
        client.export_take_files("t", vec![ExportFile::new("a", 1)], sink),
        Err(CpsError::InvalidState(_))
    ));
    assert!(matches!(outcome(done).await, Err(CpsError::InvalidState(_))));
}
