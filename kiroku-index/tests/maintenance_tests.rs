//! Maintenance tests: truncate's size-bounded purge with renumbering,
//! renumbering after manual shard removal, and the resync rebuild.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use kiroku_index::{IndexConfig, Indexer, JsonCodec, SearchItem, MIN_ROTATION_SIZE};

fn test_config(base_path: PathBuf) -> IndexConfig {
    IndexConfig {
        base_path,
        rotation_size: -1,
        sync_submit: true,
        ..Default::default()
    }
}

async fn open_indexer(config: IndexConfig) -> Indexer {
    let indexer = Indexer::new(config, Arc::new(JsonCodec::new())).unwrap();
    indexer.open().await.unwrap();
    indexer
}

async fn drain_hits(mut stream: mpsc::Receiver<SearchItem>) -> Vec<Value> {
    let mut hits = Vec::new();
    while let Some(item) = stream.recv().await {
        if let SearchItem::Hit(value) = item {
            hits.push(value);
        }
    }
    hits
}

async fn wait_for_hits(indexer: &Indexer, expected: usize) -> Vec<Value> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let stream = indexer
            .find_many(&Value::Null, 0, expected * 2 + 10, None)
            .await
            .unwrap();
        let hits = drain_hits(stream).await;
        if hits.len() == expected {
            return hits;
        }
        assert!(
            Instant::now() < deadline,
            "expected {expected} hits, last saw {}",
            hits.len()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// ~1 KiB of incompressible filler, so stored-block compression does not
/// hide document growth from the disk-usage probe.
fn bulky_entry(seq: usize) -> Value {
    let filler: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(1024)
        .map(char::from)
        .collect();
    json!({"seq": seq, "filler": filler})
}

fn fake_shard(parent: &Path, name: &str, bytes: usize) {
    let dir = parent.join(name);
    fs::create_dir_all(&dir).unwrap();
    let mut file = File::create(dir.join("data")).unwrap();
    file.write_all(&vec![b'x'; bytes]).unwrap();
}

fn data_file_len(parent: &Path, name: &str) -> u64 {
    fs::metadata(parent.join(name).join("data")).unwrap().len()
}

#[tokio::test]
async fn truncate_keeps_the_newest_shards_within_budget() {
    let tmp = TempDir::new().unwrap();
    // Oldest to newest: 50k, 40k, 30k, 20k bytes.
    fake_shard(tmp.path(), "log", 50_000);
    fake_shard(tmp.path(), "log.0001", 40_000);
    fake_shard(tmp.path(), "log.0002", 30_000);
    fake_shard(tmp.path(), "log.0003", 20_000);

    let indexer = Indexer::new(
        test_config(tmp.path().join("log")),
        Arc::new(JsonCodec::new()),
    )
    .unwrap();
    let mut lines = Vec::new();
    indexer
        .truncate(60_000, |line| lines.push(line.to_string()))
        .await
        .unwrap();
    assert!(!lines.is_empty());

    // Walking newest to oldest: 20k and 30k fit the 60k budget, 40k
    // pushes past it, so it goes along with everything older. The two
    // survivors slide down to ordinals 0 and 1 on re-open.
    assert_eq!(data_file_len(tmp.path(), "log"), 30_000);
    assert_eq!(data_file_len(tmp.path(), "log.0001"), 20_000);
    assert!(!tmp.path().join("log.0002").exists());
    assert!(!tmp.path().join("log.0003").exists());

    indexer.close().await.unwrap();
}

#[tokio::test]
async fn truncate_with_a_large_budget_removes_nothing() {
    let tmp = TempDir::new().unwrap();
    fake_shard(tmp.path(), "log", 10_000);
    fake_shard(tmp.path(), "log.0001", 10_000);

    let indexer = Indexer::new(
        test_config(tmp.path().join("log")),
        Arc::new(JsonCodec::new()),
    )
    .unwrap();
    indexer.truncate(1_000_000, |_| {}).await.unwrap();

    assert_eq!(data_file_len(tmp.path(), "log"), 10_000);
    assert_eq!(data_file_len(tmp.path(), "log.0001"), 10_000);

    indexer.close().await.unwrap();
}

#[tokio::test]
async fn truncate_on_a_live_index_leaves_survivors_searchable() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path().join("log"));
    config.rotation_size = MIN_ROTATION_SIZE;
    let indexer = open_indexer(config).await;

    // Grow a few shards through real rotations.
    let mut inserted = 0usize;
    while indexer.metrics().shards_rotated < 2 {
        for _ in 0..100 {
            indexer.insert_one(bulky_entry(inserted)).await.unwrap();
            inserted += 1;
        }
        indexer.flush();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(inserted < 20_000, "rotation never happened");
    }

    indexer.truncate(MIN_ROTATION_SIZE as u64, |_| {}).await.unwrap();

    // The survivor set is contiguous from ordinal 0 and still serves
    // queries through the alias.
    let names: Vec<String> = {
        let mut names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    };
    assert_eq!(names[0], "log");
    for (ordinal, name) in names.iter().enumerate().skip(1) {
        assert_eq!(name, &format!("log.{ordinal:04}"));
    }

    let stream = indexer.find_many(&Value::Null, 0, 100, None).await.unwrap();
    drain_hits(stream).await;
    indexer.close().await.unwrap();
}

#[tokio::test]
async fn removing_the_oldest_shard_renumbers_on_open() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path().join("log"));
    config.rotation_size = MIN_ROTATION_SIZE;
    let indexer = open_indexer(config.clone()).await;

    let mut inserted = 0usize;
    while indexer.metrics().shards_rotated < 1 {
        for _ in 0..100 {
            indexer.insert_one(bulky_entry(inserted)).await.unwrap();
            inserted += 1;
        }
        indexer.flush();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(inserted < 20_000, "rotation never happened");
    }
    indexer
        .insert_one(json!({"_id": "survivor", "msg": "lives in the newest shard"}))
        .await
        .unwrap();
    indexer.flush();
    tokio::time::sleep(Duration::from_millis(200)).await;
    indexer.close().await.unwrap();

    // Drop the ordinal-0 shard behind the indexer's back.
    fs::remove_dir_all(tmp.path().join("log")).unwrap();
    assert!(tmp.path().join("log.0001").is_dir());

    // Discovery renumbers the survivors back to a contiguous range.
    indexer.open().await.unwrap();
    assert!(tmp.path().join("log").is_dir());
    assert!(!tmp.path().join("log.0001").is_dir() || tmp.path().join("log.0002").is_dir());

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let stream = indexer
            .find_many(&json!("_id:survivor"), 0, 10, None)
            .await
            .unwrap();
        if drain_hits(stream).await.len() == 1 {
            break;
        }
        assert!(Instant::now() < deadline, "survivor document lost");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    indexer.close().await.unwrap();
}

#[tokio::test]
async fn resync_rebuilds_every_document_in_place() {
    let tmp = TempDir::new().unwrap();
    let indexer = open_indexer(test_config(tmp.path().join("log"))).await;

    let payloads: Vec<Value> = (0..5)
        .map(|i| json!({"_id": format!("evt-{i}"), "level": "info", "seq": i}))
        .collect();
    for payload in &payloads {
        indexer.insert_one(payload.clone()).await.unwrap();
    }
    indexer.flush();
    wait_for_hits(&indexer, 5).await;

    let mut lines = Vec::new();
    indexer
        .resync(|line| lines.push(line.to_string()))
        .await
        .unwrap();
    assert!(lines.iter().any(|l| l.contains("resync done")));

    let mut hits = wait_for_hits(&indexer, 5).await;
    hits.sort_by_key(|hit| hit["_id"].as_str().unwrap().to_string());
    assert_eq!(hits, payloads);

    // The scratch directory is gone; only shard directories remain.
    for entry in fs::read_dir(tmp.path()).unwrap() {
        let name = entry.unwrap().file_name().to_string_lossy().into_owned();
        assert!(
            name == "log" || name.starts_with("log."),
            "unexpected leftover: {name}"
        );
    }

    indexer.close().await.unwrap();
}
