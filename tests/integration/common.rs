use dupedex::{DedupEngine, EngineConfig};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write `files` (relative path, content) under a fresh temp dir.
pub fn tree(files: &[(&str, &[u8])]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    dir
}

/// The a/b/c scenario: a.txt and b.txt duplicate, c.txt unique.
pub fn abc_tree() -> TempDir {
    tree(&[("a.txt", b"hello"), ("b.txt", b"hello"), ("c.txt", b"world")])
}

pub fn scanned_engine(root: &Path) -> DedupEngine {
    let mut engine = DedupEngine::new(root, EngineConfig::default());
    let summary = engine.scan().unwrap();
    assert!(!summary.interrupted);
    engine
}

/// Member paths of every group, as sorted file names relative to `root`.
pub fn group_names(engine: &DedupEngine, root: &Path) -> Vec<Vec<String>> {
    engine
        .groups()
        .iter()
        .map(|g| {
            g.paths()
                .map(|p| relative(p.as_path(), root))
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn relative(path: &Path, root: &Path) -> String {
    let root = dupedex::scanner::FilePath::new(root);
    path.strip_prefix(root.as_path())
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
