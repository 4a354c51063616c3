use super::common::{abc_tree, group_names, scanned_engine, tree};
use dupedex::actions::{ActionKind, DeleteMode, ResolutionAction, ResolutionRequest};
use dupedex::error::InvariantViolation;
use dupedex::scanner::{Digest, FilePath};
use dupedex::{DedupEngine, DedupError, EngineConfig};
use std::fs;

#[test]
fn test_abc_delete_empties_listing() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;

    let res = engine
        .resolve(digest, &dir.path().join("a.txt"), ResolutionAction::Delete)
        .unwrap();
    assert_eq!(res.action, ActionKind::Delete);
    assert_eq!(res.freed_bytes, 5);
    assert!(engine.groups().is_empty());
    assert!(engine.folder_index().to_map().is_empty());
    assert!(!dir.path().join("a.txt").exists());
    assert!(dir.path().join("b.txt").exists());
}

#[test]
fn test_delete_from_larger_group_leaves_n_minus_one() {
    let dir = tree(&[("1", b"same"), ("2", b"same"), ("3", b"same"), ("4", b"same")]);
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;

    engine
        .resolve(digest, &dir.path().join("2"), ResolutionAction::Delete)
        .unwrap();
    assert_eq!(group_names(&engine, dir.path()), vec![vec!["1", "3", "4"]]);
    assert_eq!(engine.groups()[0].group_number, 1);
}

#[test]
fn test_sole_member_cannot_be_deleted() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());
    let hello = Digest::of_bytes(b"hello");
    engine
        .resolve(hello, &dir.path().join("a.txt"), ResolutionAction::Delete)
        .unwrap();

    let err = engine
        .resolve(hello, &dir.path().join("b.txt"), ResolutionAction::Delete)
        .unwrap_err();
    assert!(err.is_logic_error());
    assert_eq!(err.action, ActionKind::Delete);
    assert_eq!(err.digest, Some(hello));
    assert!(matches!(
        err.error,
        DedupError::Invariant(InvariantViolation::LastCopy { .. })
    ));
    assert!(dir.path().join("b.txt").exists());

    // Unique files are singletons and can't be deleted through the engine either
    let err = engine
        .resolve(Digest::of_bytes(b"world"), &dir.path().join("c.txt"), ResolutionAction::Delete)
        .unwrap_err();
    assert!(err.is_logic_error());
    assert!(dir.path().join("c.txt").exists());
}

#[test]
fn test_move_then_rescan_keeps_group() {
    let dir = tree(&[("a.txt", b"hello"), ("b.txt", b"hello"), ("sub/keep", b"x")]);
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;
    let dest = dir.path().join("sub").join("moved.txt");

    let res = engine
        .resolve(
            digest,
            &dir.path().join("a.txt"),
            ResolutionAction::Move {
                destination: dest.clone(),
            },
        )
        .unwrap();
    assert_eq!(res.new_path, Some(FilePath::new(&dest)));
    assert_eq!(res.freed_bytes, 0);

    engine.rescan().unwrap();
    let group = &engine.groups()[0];
    assert!(group.contains(&FilePath::new(&dest)));
    assert!(!group.contains(&FilePath::new(dir.path().join("a.txt"))));
    assert_eq!(group.len(), 2);
}

#[test]
fn test_move_conflicts_leave_everything_in_place() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;
    let before = engine.groups();

    // Onto another indexed file
    let err = engine
        .resolve(
            digest,
            &dir.path().join("a.txt"),
            ResolutionAction::Move {
                destination: dir.path().join("c.txt"),
            },
        )
        .unwrap_err();
    assert!(matches!(err.error, DedupError::Conflict(_)));

    // Onto an unindexed file that exists on disk
    fs::write(dir.path().join("stray"), b"do not clobber").unwrap();
    let err = engine
        .resolve(
            digest,
            &dir.path().join("a.txt"),
            ResolutionAction::Move {
                destination: dir.path().join("stray"),
            },
        )
        .unwrap_err();
    assert!(matches!(err.error, DedupError::Conflict(_)));

    assert_eq!(fs::read(dir.path().join("stray")).unwrap(), b"do not clobber");
    assert_eq!(fs::read(dir.path().join("c.txt")).unwrap(), b"world");
    assert_eq!(engine.groups(), before);
}

#[test]
fn test_move_into_missing_directory_fails_cleanly() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;

    let err = engine
        .resolve(
            digest,
            &dir.path().join("a.txt"),
            ResolutionAction::Move {
                destination: dir.path().join("no/such/dir/a.txt"),
            },
        )
        .unwrap_err();
    assert!(!err.is_logic_error());
    assert!(dir.path().join("a.txt").exists());
    assert_eq!(engine.groups()[0].len(), 2);
}

#[test]
fn test_modified_since_scan_is_refused() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;

    let a = dir.path().join("a.txt");
    fs::write(&a, b"hello, edited").unwrap();

    let err = engine
        .resolve(digest, &a, ResolutionAction::Delete)
        .unwrap_err();
    assert!(matches!(err.error, DedupError::Modified(_)));
    assert!(a.exists());
}

#[test]
fn test_vanished_member_reports_not_found() {
    let dir = tree(&[("a", b"v"), ("b", b"v"), ("c", b"v")]);
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;
    fs::remove_file(dir.path().join("a")).unwrap();

    let err = engine
        .resolve(digest, &dir.path().join("a"), ResolutionAction::Delete)
        .unwrap_err();
    assert!(matches!(err.error, DedupError::PathNotFound(_)));
    assert_eq!(engine.groups()[0].len(), 3);
}

#[test]
fn test_unknown_digest_and_member() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());

    let err = engine
        .resolve(
            Digest::of_bytes(b"never seen"),
            &dir.path().join("a.txt"),
            ResolutionAction::Delete,
        )
        .unwrap_err();
    assert!(matches!(err.error, DedupError::UnknownMember { .. }));

    let err = engine
        .resolve(
            Digest::of_bytes(b"hello"),
            &dir.path().join("c.txt"),
            ResolutionAction::Delete,
        )
        .unwrap_err();
    assert!(matches!(err.error, DedupError::UnknownMember { .. }));
}

#[test]
fn test_resolve_str_accepts_boundary_forms() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());
    let hex = Digest::of_bytes(b"hello").to_hex();
    let path = dir.path().join("b.txt").to_string_lossy().into_owned();

    engine
        .resolve_str(&hex.to_uppercase(), &path, ResolutionAction::Delete)
        .unwrap();
    assert!(engine.groups().is_empty());

    let err = engine
        .resolve_str("zz", &path, ResolutionAction::Delete)
        .unwrap_err();
    assert!(matches!(err.error, DedupError::InvalidDigest(_)));
    assert!(err.to_string().contains("delete"));
}

#[test]
fn test_batch_is_sequential_with_per_item_results() {
    let dir = tree(&[("1", b"q"), ("2", b"q"), ("3", b"q")]);
    let engine = scanned_engine(dir.path());
    let hex = engine.groups()[0].digest.to_hex();

    let results = engine.resolve_batch(vec![
        ResolutionRequest::new(hex.clone(), dir.path().join("1"), ResolutionAction::Delete),
        ResolutionRequest::new("bogus", dir.path().join("2"), ResolutionAction::Delete),
        ResolutionRequest::new(hex.clone(), dir.path().join("2"), ResolutionAction::Delete),
        ResolutionRequest::new(hex, dir.path().join("3"), ResolutionAction::Delete),
    ]);

    assert_eq!(results.len(), 4);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());
    assert!(results[3].as_ref().unwrap_err().is_logic_error());
    assert!(dir.path().join("3").exists());
}

#[test]
fn test_group_delete_gated_by_config() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;
    let err = engine.delete_group(digest).unwrap_err();
    assert!(matches!(
        err.error,
        DedupError::Invariant(InvariantViolation::GroupDeleteDisabled(_))
    ));

    let mut engine = DedupEngine::new(
        dir.path(),
        EngineConfig {
            allow_group_delete: true,
            ..Default::default()
        },
    );
    engine.scan().unwrap();
    let done = engine.delete_group(digest).unwrap();
    assert_eq!(done.len(), 2);
    assert!(!dir.path().join("a.txt").exists());
    assert!(!dir.path().join("b.txt").exists());
    assert!(dir.path().join("c.txt").exists());
}

#[test]
fn test_resolution_serializes() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;
    let res = engine
        .resolve(digest, &dir.path().join("b.txt"), ResolutionAction::Delete)
        .unwrap();

    let json = serde_json::to_value(&res).unwrap();
    assert_eq!(json["action"], "delete");
    assert_eq!(json["digest"], digest.to_hex());
    assert_eq!(json["freed_bytes"], 5);
    assert!(json.get("new_path").is_none());
}

#[test]
fn test_config_delete_mode_round_trips_to_policy() {
    let config = EngineConfig {
        delete_mode: DeleteMode::Trash,
        ..Default::default()
    };
    assert_eq!(config.resolution_policy().delete_mode, DeleteMode::Trash);
}
