use super::common::{abc_tree, group_names, scanned_engine, tree};
use dupedex::actions::ResolutionAction;
use dupedex::duplicates::LinkKind;
use dupedex::error::InvariantViolation;
use dupedex::scanner::FilePath;
use dupedex::{DedupEngine, DedupError, EngineConfig};
use std::fs;

#[test]
#[cfg(unix)]
fn test_hard_link_keeps_count_and_frees_storage() {
    use std::os::unix::fs::MetadataExt;

    let dir = abc_tree();
    let engine = scanned_engine(dir.path());
    let group = engine.groups()[0].clone();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");

    let res = engine
        .resolve(
            group.digest,
            &b,
            ResolutionAction::Link {
                target: a.clone(),
                kind: LinkKind::Hard,
            },
        )
        .unwrap();
    assert_eq!(res.freed_bytes, 5);
    assert_eq!(res.link.as_ref().map(|l| l.kind), Some(LinkKind::Hard));

    // Same inode now: one allocation instead of two
    assert_eq!(fs::metadata(&a).unwrap().ino(), fs::metadata(&b).unwrap().ino());

    let after = &engine.groups()[0];
    assert_eq!(after.len(), group.len());
    assert_eq!(after.wasted_space(), 0);
    let tag = after.members[1].link.as_ref().unwrap();
    assert_eq!(tag.target, FilePath::new(&a));
}

#[test]
#[cfg(unix)]
fn test_link_survives_rescan() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");

    engine
        .resolve(
            digest,
            &b,
            ResolutionAction::Link {
                target: a,
                kind: LinkKind::Hard,
            },
        )
        .unwrap();
    let linked = engine.groups();

    engine.rescan().unwrap();
    assert_eq!(engine.groups(), linked);
}

#[test]
#[cfg(unix)]
fn test_symbolic_link_member_and_guards() {
    let dir = tree(&[("a", b"content"), ("b", b"content"), ("c", b"content")]);
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;
    let a = dir.path().join("a");

    let res = engine
        .resolve(
            digest,
            &dir.path().join("c"),
            ResolutionAction::Link {
                target: a.clone(),
                kind: LinkKind::Symbolic,
            },
        )
        .unwrap();
    assert_eq!(res.link.unwrap().kind, LinkKind::Symbolic);
    assert!(fs::symlink_metadata(dir.path().join("c"))
        .unwrap()
        .file_type()
        .is_symlink());
    assert_eq!(group_names(&engine, dir.path()), vec![vec!["a", "b", "c"]]);

    // a is a symlink target: refuse to delete or move it out from under c
    let err = engine
        .resolve(digest, &a, ResolutionAction::Delete)
        .unwrap_err();
    assert!(matches!(
        err.error,
        DedupError::Invariant(InvariantViolation::LinkedTarget { .. })
    ));
    let err = engine
        .resolve(
            digest,
            &a,
            ResolutionAction::Move {
                destination: dir.path().join("elsewhere"),
            },
        )
        .unwrap_err();
    assert!(matches!(
        err.error,
        DedupError::Invariant(InvariantViolation::LinkedTarget { .. })
    ));

    // b is independent and may go; a then becomes the last real copy
    engine
        .resolve(digest, &dir.path().join("b"), ResolutionAction::Delete)
        .unwrap();
    assert!(a.exists());
    assert_eq!(fs::read(dir.path().join("c")).unwrap(), b"content");
}

#[test]
#[cfg(unix)]
fn test_link_to_symlink_member_refused() {
    let dir = tree(&[("a", b"z"), ("b", b"z"), ("c", b"z")]);
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;

    engine
        .resolve(
            digest,
            &dir.path().join("b"),
            ResolutionAction::Link {
                target: dir.path().join("a"),
                kind: LinkKind::Symbolic,
            },
        )
        .unwrap();
    let err = engine
        .resolve(
            digest,
            &dir.path().join("c"),
            ResolutionAction::Link {
                target: dir.path().join("b"),
                kind: LinkKind::Hard,
            },
        )
        .unwrap_err();
    assert!(matches!(
        err.error,
        DedupError::Invariant(InvariantViolation::InvalidLinkTarget { .. })
    ));
}

#[test]
fn test_link_target_outside_group_refused() {
    let dir = abc_tree();
    let engine = scanned_engine(dir.path());
    let digest = engine.groups()[0].digest;

    let err = engine
        .resolve(
            digest,
            &dir.path().join("b.txt"),
            ResolutionAction::Link {
                target: dir.path().join("c.txt"),
                kind: LinkKind::Hard,
            },
        )
        .unwrap_err();
    assert!(matches!(
        err.error,
        DedupError::Invariant(InvariantViolation::InvalidLinkTarget { .. })
    ));
    assert_eq!(fs::read(dir.path().join("b.txt")).unwrap(), b"hello");
}

#[test]
#[cfg(unix)]
fn test_preexisting_hardlinks_fold_into_one_member() {
    let dir = tree(&[("orig", b"shared")]);
    fs::hard_link(dir.path().join("orig"), dir.path().join("alias")).unwrap();

    let mut engine = DedupEngine::new(dir.path(), EngineConfig::default());
    let summary = engine.scan().unwrap();
    assert_eq!(summary.total_files, 1);
    assert!(engine.groups().is_empty());
}

#[test]
#[cfg(unix)]
fn test_symlink_aliases_do_not_form_groups() {
    let dir = tree(&[("real", b"data")]);
    std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();

    let engine = scanned_engine(dir.path());
    assert!(engine.groups().is_empty());
    assert_eq!(engine.index().len(), 1);
}

#[test]
#[cfg(unix)]
fn test_fresh_engine_protects_existing_symbolic_links() {
    let dir = tree(&[("a", b"same"), ("b", b"same"), ("c", b"same")]);
    let a = dir.path().join("a");
    let b = dir.path().join("b");

    // First session: replace b with a symbolic link to a
    {
        let engine = scanned_engine(dir.path());
        let digest = engine.groups()[0].digest;
        engine
            .resolve(
                digest,
                &b,
                ResolutionAction::Link {
                    target: a.clone(),
                    kind: LinkKind::Symbolic,
                },
            )
            .unwrap();
    }

    // Second session knows b only as a link found on disk
    let engine = scanned_engine(dir.path());
    assert_eq!(group_names(&engine, dir.path()), vec![vec!["a", "c"]]);
    let digest = engine.groups()[0].digest;

    let err = engine.resolve(digest, &a, ResolutionAction::Delete).unwrap_err();
    assert!(matches!(
        err.error,
        DedupError::Invariant(InvariantViolation::LinkedTarget { .. })
    ));
    assert_eq!(fs::read(&b).unwrap(), b"same");

    // The unlinked copy is still free to go
    engine
        .resolve(digest, &dir.path().join("c"), ResolutionAction::Delete)
        .unwrap();
    assert_eq!(fs::read(&b).unwrap(), b"same");
}
