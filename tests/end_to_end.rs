//! End-to-end scenarios exercising the cache through the facade, the way a
//! WebDAV client would drive it.

use std::sync::Arc;

use cachedav::cache::BlockCache;
use cachedav::fs::{FileSystemFacade, OpenFlags, OpenedFile};

const BLOCK_SIZE: usize = 4 * 1024 * 1024;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

async fn read_all(file: &mut cachedav::fs::CachingFile) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

fn as_caching(opened: OpenedFile) -> cachedav::fs::CachingFile {
    match opened {
        OpenedFile::Caching(f) => f,
        OpenedFile::Passthrough(_) => panic!("expected a cached open"),
    }
}

/// Scenario 1: sequential read of a ~2.38-block file via 64 KiB buffers.
#[tokio::test]
async fn scenario_sequential_read_populates_exactly_the_needed_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(10_000_000);
    std::fs::write(dir.path().join("big.bin"), &data).unwrap();

    let cache = Arc::new(BlockCache::new(16));
    let facade = FileSystemFacade::new(dir.path().to_path_buf(), Some(cache.clone()), 4, false);

    let opened = facade.open(std::path::Path::new("big.bin"), OpenFlags::read_only()).await.unwrap();
    let mut file = as_caching(opened);

    let out = read_all(&mut file).await;
    assert_eq!(out.len(), 10_000_000);
    assert_eq!(out, data);
    assert_eq!(cache.len(), 3);
}

/// Scenario 2: two parallel sessions reading the same file from offset 0.
#[tokio::test]
async fn scenario_two_parallel_sessions_see_identical_bytes_and_share_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(10_000_000);
    std::fs::write(dir.path().join("shared.bin"), &data).unwrap();

    let cache = Arc::new(BlockCache::new(16));
    let facade = Arc::new(FileSystemFacade::new(dir.path().to_path_buf(), Some(cache.clone()), 4, false));

    let open_one = {
        let facade = facade.clone();
        tokio::spawn(async move {
            let mut f = as_caching(facade.open(std::path::Path::new("shared.bin"), OpenFlags::read_only()).await.unwrap());
            read_all(&mut f).await
        })
    };
    let open_two = {
        let facade = facade.clone();
        tokio::spawn(async move {
            let mut f = as_caching(facade.open(std::path::Path::new("shared.bin"), OpenFlags::read_only()).await.unwrap());
            read_all(&mut f).await
        })
    };

    let (first, second) = tokio::join!(open_one, open_two);
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first, data);
    assert_eq!(second, data);
    assert!(cache.len() <= 3);
}

/// Scenario 3: the file is replaced between open and the first read.
#[tokio::test]
async fn scenario_file_replaced_after_open_falls_back_to_original_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target.bin");
    let original = vec![0xAAu8; BLOCK_SIZE];
    std::fs::write(&path, &original).unwrap();

    let cache = Arc::new(BlockCache::new(16));
    let facade = FileSystemFacade::new(dir.path().to_path_buf(), Some(cache), 0, false);

    let opened = facade.open(std::path::Path::new("target.bin"), OpenFlags::read_only()).await.unwrap();
    let mut file = as_caching(opened);

    std::fs::remove_file(&path).unwrap();
    std::fs::write(&path, vec![0xBBu8; BLOCK_SIZE]).unwrap();

    let out = read_all(&mut file).await;
    assert_eq!(out, original, "must observe the file as it was at open time");
}

/// Scenario 4: capacity-2 cache evicts the oldest of three single-block files.
#[tokio::test]
async fn scenario_capacity_eviction_forces_a_fresh_fill_on_re_read() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.bin", "b.bin", "c.bin"] {
        std::fs::write(dir.path().join(name), vec![1u8; 100]).unwrap();
    }

    let cache = Arc::new(BlockCache::new(2));
    let facade = FileSystemFacade::new(dir.path().to_path_buf(), Some(cache.clone()), 0, false);

    for name in ["a.bin", "b.bin", "c.bin"] {
        let mut file = as_caching(facade.open(std::path::Path::new(name), OpenFlags::read_only()).await.unwrap());
        let mut buf = [0u8; 16];
        file.read(&mut buf).await.unwrap();
    }

    assert_eq!(cache.len(), 2, "capacity must never be exceeded");

    // Re-reading "a.bin" must still succeed even though its block was evicted.
    let mut file = as_caching(facade.open(std::path::Path::new("a.bin"), OpenFlags::read_only()).await.unwrap());
    let mut buf = [0u8; 16];
    let n = file.read(&mut buf).await.unwrap();
    assert_eq!(n, 16);
    assert_eq!(&buf, &[1u8; 16]);
}

/// Scenario 5: prefetch window extends past EOF on a 1.5-block file.
#[tokio::test]
async fn scenario_prefetch_past_eof_schedules_only_real_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(BLOCK_SIZE + BLOCK_SIZE / 2);
    std::fs::write(dir.path().join("oneandahalf.bin"), &data).unwrap();

    let cache = Arc::new(BlockCache::new(16));
    let facade = FileSystemFacade::new(dir.path().to_path_buf(), Some(cache.clone()), 8, false);

    let mut file =
        as_caching(facade.open(std::path::Path::new("oneandahalf.bin"), OpenFlags::read_only()).await.unwrap());
    let mut buf = [0u8; 16];
    file.read(&mut buf).await.unwrap();

    assert_eq!(cache.len(), 2, "only blocks 0 and 1 exist; nothing beyond EOF should be scheduled");
}

/// Scenario 6: a fill failure on block 1 does not disturb block 0's entry.
#[tokio::test]
async fn scenario_fill_failure_on_one_block_does_not_poison_an_earlier_block() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(BLOCK_SIZE * 3);
    let path = dir.path().join("three_blocks.bin");
    std::fs::write(&path, &data).unwrap();

    let cache = Arc::new(BlockCache::new(16));
    let facade = FileSystemFacade::new(dir.path().to_path_buf(), Some(cache.clone()), 0, false);

    let mut file =
        as_caching(facade.open(std::path::Path::new("three_blocks.bin"), OpenFlags::read_only()).await.unwrap());

    let mut buf = vec![0u8; BLOCK_SIZE];
    let n = file.read(&mut buf).await.unwrap();
    assert_eq!(n, BLOCK_SIZE);
    assert_eq!(cache.len(), 1);

    // Truncate the backing file so block 1's fill short-reads. The already
    // resident block 0 entry must remain untouched and Ready.
    let truncated = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    truncated.set_len(BLOCK_SIZE as u64 + 10).unwrap();
    drop(truncated);

    let mut buf = vec![0u8; BLOCK_SIZE];
    let result = file.read(&mut buf).await;
    assert!(result.is_err(), "reading into the truncated block must surface a fill failure");
    assert_eq!(cache.len(), 2, "block 0 must still be resident alongside the failed block 1 entry");
}
