use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use filesink_core::Error;
use filesink_core::channel::{Channel, MemoryChannel, Transaction};
use filesink_core::config::{ChannelConfig, Context, DecodePolicy, FileSinkConfig, RunnerConfig};
use filesink_core::runner::SinkRunner;
use filesink_core::sinker::{FileSink, Sink, Status};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn channel() -> MemoryChannel {
    MemoryChannel::new("c1", ChannelConfig::default())
}

fn sink_config(path: &Path) -> FileSinkConfig {
    let mut config = FileSinkConfig::new(path);
    config.take_timeout = Duration::from_millis(100);
    config
}

/// Splits the file into records and checks each one is `<payload>:<13 digit millis>`.
fn read_records(path: &Path) -> Vec<String> {
    let content = fs::read_to_string(path).unwrap();
    assert!(content.is_empty() || content.ends_with("\r\n"));
    content
        .split_terminator("\r\n")
        .map(|line| {
            let (payload, millis) = line.rsplit_once(':').unwrap();
            assert_eq!(millis.len(), 13, "bad timestamp in {line:?}");
            assert!(millis.chars().all(|c| c.is_ascii_digit()));
            payload.to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_hello_record() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.txt");
    let channel = channel();
    let mut sink = FileSink::new("k1", sink_config(&path), channel.clone());

    channel.put("hello").unwrap();
    assert_eq!(sink.process().await.unwrap(), Status::Ready);

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("hello:"));
    assert!(content.ends_with("\r\n"));
    assert_eq!(content.len(), "hello:".len() + 13 + 2);
    assert_eq!(read_records(&path), vec!["hello"]);
    assert!(channel.is_empty());
}

#[tokio::test]
async fn test_appends_in_channel_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.txt");
    fs::write(&path, "existing:1700000000000\r\n").unwrap();

    let channel = channel();
    let mut sink = FileSink::new("k1", sink_config(&path), channel.clone());
    for body in ["a", "b:c", ""] {
        channel.put(body).unwrap();
    }
    for _ in 0..3 {
        assert_eq!(sink.process().await.unwrap(), Status::Ready);
    }

    assert_eq!(read_records(&path), vec!["existing", "a", "b:c", ""]);
}

#[tokio::test]
async fn test_empty_channel_backs_off() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.txt");
    let channel = channel();
    let mut sink = FileSink::new("k1", FileSinkConfig::new(&path), channel.clone());

    let start = Instant::now();
    assert_eq!(sink.process().await.unwrap(), Status::Backoff);
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(500), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");
    assert!(!path.exists());
    assert_eq!(channel.in_flight(), 0);
}

#[tokio::test]
async fn test_missing_directory_rolls_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs").join("out.txt");
    let channel = channel();
    let mut sink = FileSink::new("k1", sink_config(&path), channel.clone());

    channel.put("hello").unwrap();
    let err = sink.process().await.unwrap_err();
    assert!(matches!(err, Error::Delivery(_)), "unexpected error {err:?}");
    assert_eq!(channel.len(), 1);
    assert_eq!(channel.in_flight(), 0);

    fs::create_dir(dir.path().join("logs")).unwrap();
    assert_eq!(sink.process().await.unwrap(), Status::Ready);
    assert_eq!(read_records(&path), vec!["hello"]);
    assert_eq!(sink.counter().delivery_error(), 1);
    assert_eq!(sink.counter().drain_success(), 1);
}

#[tokio::test]
async fn test_commit_failure_leaves_no_record() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.txt");
    let channel = channel();
    let mut sink = FileSink::new("k1", sink_config(&path), channel.clone());

    channel.put("first").unwrap();
    assert_eq!(sink.process().await.unwrap(), Status::Ready);

    channel.put("second").unwrap();
    channel.error_injector().fail_commits(1);
    assert!(matches!(sink.process().await, Err(Error::Delivery(_))));
    assert_eq!(read_records(&path), vec!["first"]);
    assert_eq!(channel.len(), 1);

    assert_eq!(sink.process().await.unwrap(), Status::Ready);
    assert_eq!(read_records(&path), vec!["first", "second"]);
}

#[tokio::test]
async fn test_decode_policies() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.txt");
    let channel = channel();
    let mut sink = FileSink::new("k1", sink_config(&path), channel.clone());

    channel.put(vec![0xf0, 0x28, 0x8c, 0x28]).unwrap();
    assert!(matches!(sink.process().await, Err(Error::Delivery(_))));
    assert!(!path.exists());
    assert_eq!(channel.len(), 1);

    let mut config = sink_config(&path);
    config.decode = DecodePolicy::Lossy;
    let mut sink = FileSink::new("k1", config, channel.clone());
    assert_eq!(sink.process().await.unwrap(), Status::Ready);

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.starts_with('\u{FFFD}'));
    assert!(channel.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sinks_share_one_file() {
    const EVENTS: usize = 100;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.txt");
    let channel = channel();
    for i in 0..EVENTS {
        channel.put(format!("event-{i:03}")).unwrap();
    }

    let mut handles = Vec::new();
    for n in 0..4 {
        let mut sink = FileSink::new(&format!("k{n}"), sink_config(&path), channel.clone());
        handles.push(tokio::spawn(async move {
            let mut processed = 0;
            while sink.process().await.unwrap() == Status::Ready {
                processed += 1;
            }
            processed
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, EVENTS);

    let records = read_records(&path);
    assert_eq!(records.len(), EVENTS);
    let unique: BTreeSet<_> = records.iter().cloned().collect();
    let expected: BTreeSet<_> = (0..EVENTS).map(|i| format!("event-{i:03}")).collect();
    assert_eq!(unique, expected);
    assert!(channel.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sinks_with_large_records() {
    const EVENTS: u8 = 8;
    const RECORD_SIZE: usize = 3 * 1024 * 1024;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.txt");
    let channel = channel();
    for letter in b'a'..b'a' + EVENTS {
        channel.put(vec![letter; RECORD_SIZE]).unwrap();
    }

    let mut handles = Vec::new();
    for n in 0..4 {
        let mut sink = FileSink::new(&format!("k{n}"), sink_config(&path), channel.clone());
        handles.push(tokio::spawn(async move {
            while sink.process().await.unwrap() == Status::Ready {}
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let records = read_records(&path);
    assert_eq!(records.len(), usize::from(EVENTS));
    let mut letters = BTreeSet::new();
    for payload in &records {
        assert_eq!(payload.len(), RECORD_SIZE);
        let first = payload.as_bytes()[0];
        assert!(payload.bytes().all(|b| b == first), "record of '{}' was interleaved", first as char);
        letters.insert(first);
    }
    assert_eq!(letters.len(), usize::from(EVENTS));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_process_leaves_whole_record_or_nothing() {
    const RECORD_SIZE: usize = 32 * 1024 * 1024;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.txt");
    let channel = channel();
    channel.put(vec![b'x'; RECORD_SIZE]).unwrap();

    let mut sink = FileSink::new("k1", sink_config(&path), channel.clone());
    let handle = tokio::spawn(async move { sink.process().await });

    while channel.in_flight() == 0 && !channel.is_empty() {
        tokio::task::yield_now().await;
    }
    handle.abort();
    let _ = handle.await;

    // whatever was started runs to the end
    let deadline = Instant::now() + Duration::from_secs(10);
    while channel.in_flight() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(channel.in_flight(), 0);

    if channel.is_empty() {
        let records = read_records(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), RECORD_SIZE);
    } else {
        assert_eq!(channel.len(), 1);
        assert_eq!(fs::metadata(&path).map(|m| m.len()).unwrap_or(0), 0);
    }
}

#[tokio::test]
async fn test_panicking_consumer_keeps_event() {
    let channel = channel();
    channel.put("precious").unwrap();

    let consumer = channel.clone();
    let result = tokio::spawn(async move {
        let mut txn = consumer.begin_transaction().unwrap();
        let event = txn.take().unwrap().unwrap();
        if event.body == "precious" {
            panic!("consumer blew up");
        }
    })
    .await;

    assert!(result.unwrap_err().is_panic());
    assert_eq!(channel.len(), 1);
    assert_eq!(channel.in_flight(), 0);
}

#[test]
fn test_configure_from_agent_properties() {
    let dir = TempDir::new().unwrap();
    let text = format!(
        "a1.sinks.k1.filename = {}\na1.sinks.k1.sync = true\n",
        dir.path().join("out.txt").display()
    );
    let context = Context::from_properties(&text).unwrap();
    let sink = FileSink::configure("k1", &context.sub_properties("a1.sinks.k1."), channel()).unwrap();
    assert!(sink.config().sync);
    assert_eq!(sink.name(), "k1");

    let empty = Context::from_properties("a1.sinks.k1.filename =\n").unwrap();
    let result = FileSink::configure("k1", &empty.sub_properties("a1.sinks.k1."), channel());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_runner_drains_channel() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.txt");
    let channel = channel();
    for i in 0..5 {
        channel.put(format!("line {i}")).unwrap();
    }

    let mut config = sink_config(&path);
    config.take_timeout = Duration::from_millis(20);
    let sink = FileSink::new("k1", config, channel.clone());
    let runner_config = RunnerConfig {
        backoff_increment: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
    };

    let cln_token = CancellationToken::new();
    let handle = SinkRunner::new(sink, runner_config).start(cln_token.clone());

    let deadline = Instant::now() + Duration::from_secs(5);
    while !channel.is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cln_token.cancel();
    let summary = handle.await.unwrap().unwrap();

    assert_eq!(summary.processed, 5);
    assert_eq!(summary.failures, 0);
    assert_eq!(
        read_records(&path),
        (0..5).map(|i| format!("line {i}")).collect::<Vec<_>>()
    );
}
