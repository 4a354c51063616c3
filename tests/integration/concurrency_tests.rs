use super::common::{scanned_engine, tree};
use dupedex::actions::ResolutionAction;
use dupedex::duplicates::{DuplicateFinder, DuplicateIndex, FinderConfig};
use dupedex::scanner::Digest;
use dupedex::signal::CancelToken;
use dupedex::error::InvariantViolation;
use dupedex::{DedupEngine, DedupError, EngineConfig};
use std::fs;
use std::thread;
use std::time::Duration;

fn assert_index_matches_disk(engine: &DedupEngine) {
    for path in engine.index().paths() {
        assert!(
            path.as_path().exists(),
            "{} is indexed but missing on disk",
            path
        );
    }
}

fn wide_tree(groups: usize, copies: usize) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for g in 0..groups {
        for c in 0..copies {
            let path = dir.path().join(format!("d{}", c)).join(format!("f{:03}", g));
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, format!("group {} payload", g)).unwrap();
        }
    }
    dir
}

#[test]
fn test_worker_count_does_not_change_result() {
    let dir = wide_tree(40, 3);
    let scan = |threads: usize| {
        let index = DuplicateIndex::new();
        DuplicateFinder::new(FinderConfig::default().with_io_threads(threads))
            .scan_into(dir.path(), &index)
            .unwrap();
        index.groups()
    };

    let baseline = scan(1);
    assert_eq!(baseline.len(), 40);
    for threads in [2, 4, 16] {
        assert_eq!(scan(threads), baseline);
    }
}

#[test]
fn test_concurrent_resolutions_on_distinct_groups() {
    let dir = wide_tree(16, 2);
    let engine = scanned_engine(dir.path());
    let groups = engine.groups();
    assert_eq!(groups.len(), 16);

    thread::scope(|s| {
        for group in &groups {
            let engine = &engine;
            s.spawn(move || {
                engine
                    .resolve(group.digest, group.members[1].path.as_path(), ResolutionAction::Delete)
                    .unwrap();
            });
        }
    });

    assert!(engine.groups().is_empty());
    assert_eq!(engine.index().len(), 16);
}

#[test]
fn test_racing_deletes_never_lose_last_copy() {
    let dir = tree(&[("a", b"race"), ("b", b"race"), ("c", b"race")]);
    let engine = scanned_engine(dir.path());
    let digest = Digest::of_bytes(b"race");
    let paths: Vec<_> = ["a", "b", "c"].iter().map(|n| dir.path().join(n)).collect();

    let outcomes: Vec<bool> = thread::scope(|s| {
        let handles: Vec<_> = paths
            .iter()
            .map(|p| {
                let engine = &engine;
                s.spawn(move || engine.resolve(digest, p, ResolutionAction::Delete).is_ok())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 2);
    assert_eq!(paths.iter().filter(|p| p.exists()).count(), 1);
    assert_eq!(engine.index().len(), 1);
}

#[test]
fn test_resolve_during_rescan_stays_consistent() {
    let dir = wide_tree(50, 2);
    let engine = scanned_engine(dir.path());
    let groups = engine.groups();

    thread::scope(|s| {
        let engine = &engine;
        s.spawn(move || {
            for _ in 0..3 {
                engine.rescan().unwrap();
            }
        });
        s.spawn(move || {
            for group in groups.iter().take(25) {
                engine
                    .resolve(group.digest, group.members[0].path.as_path(), ResolutionAction::Delete)
                    .unwrap();
            }
        });
    });

    // No record may outlive its file, before any further pass
    assert_index_matches_disk(&engine);
    for group in engine.groups() {
        assert!(group.len() >= 2);
    }

    // Settle, then compare with a fresh scan of the same tree
    engine.rescan().unwrap();
    let fresh = scanned_engine(dir.path());
    let digests = |e: &DedupEngine| {
        let mut d: Vec<_> = e.groups().iter().map(|g| g.digest).collect();
        d.sort();
        d
    };
    assert_eq!(digests(&engine), digests(&fresh));
    assert_eq!(engine.groups().len(), 25);
    assert!(engine.stale_paths().is_empty());
}

#[test]
fn test_cancel_mid_scan_keeps_inserted_records() {
    let dir = wide_tree(200, 2);
    let token = CancelToken::new();
    let mut engine = DedupEngine::new(
        dir.path(),
        EngineConfig {
            io_threads: 1,
            ..Default::default()
        },
    )
    .with_cancel_token(token.clone());

    let summary = thread::scope(|s| {
        s.spawn(|| token.cancel());
        engine.scan().unwrap()
    });

    if summary.interrupted {
        // Whatever made it in is fully hashed and consistent
        for group in engine.groups() {
            assert!(group.len() >= 2);
        }
        assert_eq!(summary.pruned, 0);
        assert!(engine.index().len() <= 400);
    } else {
        assert_eq!(engine.groups().len(), 200);
    }
}

#[test]
fn test_delete_while_rescan_hashes_same_file() {
    let payload = vec![7u8; 64 * 1024 * 1024];
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.bin");
    let b = dir.path().join("b.bin");
    fs::write(&a, &payload).unwrap();
    fs::write(&b, &payload).unwrap();
    drop(payload);

    let mut engine = DedupEngine::new(
        dir.path(),
        EngineConfig {
            io_threads: 1,
            skip_unchanged: false,
            ..Default::default()
        },
    );
    engine.scan().unwrap();
    let digest = engine.groups()[0].digest;

    thread::scope(|s| {
        let engine = &engine;
        let rescan = s.spawn(move || engine.rescan().unwrap());
        thread::sleep(Duration::from_millis(30));
        engine.resolve(digest, &a, ResolutionAction::Delete).unwrap();
        rescan.join().unwrap();
    });

    // The rescan must not have brought the deleted path back
    assert!(!a.exists());
    assert!(!engine.index().contains(&a));
    assert_index_matches_disk(&engine);
    assert!(engine.groups().is_empty());

    let err = engine.resolve(digest, &b, ResolutionAction::Delete).unwrap_err();
    assert!(matches!(
        err.error,
        DedupError::Invariant(InvariantViolation::LastCopy { .. })
    ));
    assert!(b.exists());
}
