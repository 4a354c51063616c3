use super::common::{abc_tree, group_names, relative, scanned_engine, tree};
use dupedex::duplicates::IssueKind;
use dupedex::scanner::Digest;
use dupedex::{index_folder, index_folder_with, DedupEngine, DedupError, EngineConfig};
use std::fs;

#[test]
fn test_abc_scenario_single_group() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());

    assert_eq!(group_names(&engine, dir.path()), vec![vec!["a.txt", "b.txt"]]);
    let group = &engine.groups()[0];
    assert_eq!(group.group_number, 1);
    assert_eq!(group.digest, Digest::of_bytes(b"hello"));
    assert_eq!(group.size, 5);
}

#[test]
fn test_index_folder_json_shape() {
    let dir = abc_tree();
    let index = index_folder(dir.path().to_str().unwrap()).unwrap();

    let json: serde_json::Value = serde_json::to_value(&index).unwrap();
    let object = json.as_object().unwrap();
    assert_eq!(object.len(), 1);

    let hex = Digest::of_bytes(b"hello").to_hex();
    let paths = object[&hex].as_array().unwrap();
    assert_eq!(paths.len(), 2);
    assert!(paths[0].as_str().unwrap().ends_with("a.txt"));
    assert!(paths[1].as_str().unwrap().ends_with("b.txt"));
    assert!(index.errors.is_empty());
}

#[test]
fn test_index_folder_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");
    let err = index_folder(missing.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, DedupError::PathNotFound(_)));
}

#[test]
fn test_index_folder_file_root() {
    let dir = abc_tree();
    let err = index_folder(dir.path().join("a.txt").to_str().unwrap()).unwrap_err();
    assert!(matches!(err, DedupError::NotADirectory(_)));
}

#[test]
fn test_no_group_has_fewer_than_two_members() {
    let dir = tree(&[
        ("one.txt", b"solo"),
        ("x/two.txt", b"pair"),
        ("y/two.txt", b"pair"),
        ("x/three.txt", b"triple"),
        ("y/three.txt", b"triple"),
        ("z/three.txt", b"triple"),
    ]);
    let engine = scanned_engine(dir.path());
    let groups = engine.groups();
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(|g| g.len() >= 2));
}

#[test]
fn test_numbering_follows_walk_order() {
    // "b_first" sorts before "z_later" so its group is discovered first
    let dir = tree(&[
        ("b_first/1.txt", b"first content"),
        ("z_later/1.txt", b"second content"),
        ("z_later/2.txt", b"first content"),
        ("z_later/3.txt", b"second content"),
    ]);
    let engine = scanned_engine(dir.path());
    let groups = engine.groups();

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].group_number, 1);
    assert_eq!(groups[0].digest, Digest::of_bytes(b"first content"));
    assert_eq!(groups[1].group_number, 2);
    assert_eq!(groups[1].digest, Digest::of_bytes(b"second content"));
}

#[test]
fn test_repeat_indexing_is_stable() {
    let mut files = Vec::new();
    for i in 0..30 {
        files.push((format!("dir{}/file{}.bin", i % 4, i), format!("content {}", i % 7)));
    }
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in &files {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    let root = dir.path().to_str().unwrap();
    let first = index_folder(root).unwrap();
    for _ in 0..3 {
        let again = index_folder(root).unwrap();
        assert_eq!(again.groups(), first.groups());
        assert_eq!(
            serde_json::to_string(&again).unwrap(),
            serde_json::to_string(&first).unwrap()
        );
    }
}

#[test]
fn test_empty_files_grouped_by_default() {
    let dir = tree(&[("e1", b""), ("e2", b""), ("full", b"data")]);
    let engine = scanned_engine(dir.path());
    let groups = engine.groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].digest, Digest::of_bytes(b""));
    assert_eq!(groups[0].size, 0);
}

#[test]
fn test_empty_files_excluded_when_configured() {
    let dir = tree(&[("e1", b""), ("e2", b""), ("full", b"data")]);
    let config = EngineConfig {
        include_empty: false,
        ..Default::default()
    };
    let index = index_folder_with(dir.path(), config).unwrap();
    assert!(index.is_empty());
}

#[test]
fn test_filters_apply() {
    let dir = tree(&[
        ("small1", b"ab"),
        ("small2", b"ab"),
        ("big1", b"0123456789"),
        ("big2", b"0123456789"),
        ("skip.tmp", b"0123456789"),
        (".hidden", b"0123456789"),
    ]);
    let config = EngineConfig {
        min_size: Some(5),
        skip_hidden: true,
        ignore_patterns: vec!["*.tmp".to_string()],
        ..Default::default()
    };
    let index = index_folder_with(dir.path(), config).unwrap();
    assert_eq!(index.len(), 1);
    let paths = &index.groups()[0].path_strings();
    assert_eq!(paths.len(), 2);
    assert!(paths.iter().all(|p| p.contains("big")));
}

#[test]
fn test_gitignore_respected() {
    let dir = tree(&[
        (".gitignore", b"build/\n"),
        ("src/a", b"same"),
        ("src/b", b"same"),
        ("build/a", b"same"),
    ]);
    let engine = scanned_engine(dir.path());
    assert_eq!(group_names(&engine, dir.path()), vec![vec!["src/a", "src/b"]]);
}

#[test]
fn test_rescan_after_external_changes() {
    let dir = tree(&[("a", b"one"), ("b", b"one"), ("c", b"two")]);
    let engine = scanned_engine(dir.path());
    assert_eq!(engine.groups().len(), 1);

    fs::write(dir.path().join("d"), b"two").unwrap();
    fs::remove_file(dir.path().join("b")).unwrap();
    let summary = engine.rescan().unwrap();

    assert_eq!(summary.pruned, 1);
    assert_eq!(group_names(&engine, dir.path()), vec![vec!["c", "d"]]);
    assert!(engine.index().contains(&dir.path().join("a")));
}

#[test]
fn test_rescan_keeps_numbers_of_surviving_groups() {
    let dir = tree(&[("a1", b"A"), ("a2", b"A"), ("b1", b"B"), ("b2", b"B")]);
    let engine = scanned_engine(dir.path());
    let before = engine.groups();

    // A new group whose files sort first still numbers after existing ones
    fs::write(dir.path().join("0first"), b"C").unwrap();
    fs::write(dir.path().join("0second"), b"C").unwrap();
    engine.rescan().unwrap();

    let after = engine.groups();
    assert_eq!(after.len(), 3);
    assert_eq!(after[0].digest, before[0].digest);
    assert_eq!(after[1].digest, before[1].digest);
    assert_eq!(after[2].digest, Digest::of_bytes(b"C"));
}

#[test]
fn test_fresh_scan_discards_previous_index() {
    let dir = tree(&[("a", b"x"), ("b", b"x")]);
    let mut engine = DedupEngine::new(dir.path(), EngineConfig::default());
    engine.scan().unwrap();
    let generation = engine.scan().unwrap().generation;
    assert_eq!(generation, 1);
}

#[test]
#[cfg(unix)]
fn test_unreadable_file_reported_beside_groups() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tree(&[("a", b"dup"), ("b", b"dup"), ("locked", b"secret")]);
    let locked = dir.path().join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read(&locked).is_ok() {
        // Running as root; permissions are not enforced
        return;
    }

    let index = index_folder(dir.path().to_str().unwrap()).unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.errors.len(), 1);
    assert_eq!(index.errors[0].kind, IssueKind::Access);
    assert_eq!(relative(std::path::Path::new(&index.errors[0].path), dir.path()), "locked");

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
}

#[test]
fn test_timed_out_index_folder_is_an_error() {
    let dir = abc_tree();
    let config = EngineConfig {
        scan_timeout_secs: Some(0),
        ..Default::default()
    };
    let err = index_folder_with(dir.path(), config).unwrap_err();
    assert!(matches!(err, DedupError::TimedOut(_)));
}
