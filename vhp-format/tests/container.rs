use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use vhp_format::{ArchiveHandle, DirId, ErrorKind, HandleOptions, Tree, VERSION};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn options(dir: &Path) -> HandleOptions {
    HandleOptions::new(dir.join("out/archive.vhp"), dir.join("workspace"))
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Builds a small tree with nested, empty, and multi-chunk files.
fn populate(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    files.insert("top.txt".to_string(), b"top level".to_vec());
    files.insert("empty".to_string(), vec![]);
    files.insert("docs/readme.md".to_string(), b"# readme\n".to_vec());
    files.insert("docs/deep/er/blob.bin".to_string(), pattern(100_000, 7));
    files.insert("media/photo.raw".to_string(), pattern(4097, 200));
    files.insert("media/ünïcödé name.txt".to_string(), "ok".into());

    for (path, data) in files.iter() {
        let path = root.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }
    std::fs::create_dir_all(root.join("empty-dir")).unwrap();

    files
}

/// Every file in the tree as `path -> length`, plus every directory path.
fn shape(tree: &Tree) -> (BTreeMap<String, u64>, Vec<String>) {
    let files = tree
        .iter_files()
        .map(|(id, f)| (tree.path_of_file(id).unwrap(), f.length()))
        .collect();

    let mut dirs = vec![];
    let mut stack: Vec<DirId> = vec![tree.root()];
    while let Some(id) = stack.pop() {
        let dir = tree.directory(id).unwrap();
        dirs.push(tree.path_of_directory(id));
        stack.extend(dir.directories());
    }
    dirs.sort();

    (files, dirs)
}

fn walk_host(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap();
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.insert(rel, std::fs::read(&path).unwrap());
            }
        }
    }
    out
}

fn created(dir: &TempDir) -> (ArchiveHandle, BTreeMap<String, Vec<u8>>, PathBuf) {
    let source = dir.path().join("source");
    let files = populate(&source);
    let mut handle = ArchiveHandle::new(options(dir.path()).with_buffer_size(4096));
    handle.create(&source).unwrap();
    (handle, files, source)
}

#[test]
fn read_reproduces_created_tree() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let (handle, files, _) = created(&dir);

    let mut reader = ArchiveHandle::new(options(dir.path()));
    reader.read(dir.path().join("out/archive.vhp")).unwrap();

    assert_eq!(shape(reader.tree()), shape(handle.tree()));

    let (lengths, dirs) = shape(reader.tree());
    let expected = files
        .iter()
        .map(|(k, v)| (k.clone(), v.len() as u64))
        .collect::<BTreeMap<_, _>>();
    assert_eq!(lengths, expected);
    assert!(dirs.contains(&"empty-dir".to_string()));
    assert!(dirs.contains(&"docs/deep/er".to_string()));

    // Only the index is loaded: every file points into the container.
    for (_, file) in reader.tree().iter_files() {
        assert!(!file.is_pending());
        assert!(file.offset().is_some());
    }
    assert_eq!(reader.tree().total_length(), expected.values().sum::<u64>());
}

#[test]
fn extract_is_byte_identical() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let (_, files, _) = created(&dir);

    let mut reader = ArchiveHandle::new(options(dir.path()).with_buffer_size(1000));
    reader.read(dir.path().join("out/archive.vhp")).unwrap();

    let dest = dir.path().join("extracted");
    reader.extract(&dest).unwrap();
    assert_eq!(walk_host(&dest), files);
    assert!(dest.join("empty-dir").is_dir());

    for (path, data) in files.iter() {
        assert_eq!(&reader.read_all_bytes(path, None).unwrap(), data);
    }
}

#[test]
fn edits_survive_reopen() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let (mut handle, _, _) = created(&dir);
    let docs = handle.tree().resolve_directory(None, "docs").unwrap();

    handle
        .write_all_bytes(&pattern(9000, 1), "readme.md", docs, true)
        .unwrap();
    handle
        .write_all_bytes_at(b"fresh", "new/nested/file.txt", false)
        .unwrap();
    handle.remove_file("media/photo.raw", None).unwrap();

    let mut reader = ArchiveHandle::new(options(dir.path()));
    reader.read(dir.path().join("out/archive.vhp")).unwrap();
    assert_eq!(
        reader.read_all_bytes("docs/readme.md", None).unwrap(),
        pattern(9000, 1)
    );
    assert_eq!(
        reader.read_all_text("new/nested/file.txt", None).unwrap(),
        "fresh"
    );
    assert!(!reader.file_exists("media/photo.raw", None));
    assert_eq!(
        reader.read_all_bytes("docs/deep/er/blob.bin", None).unwrap(),
        pattern(100_000, 7)
    );
}

#[test]
fn saving_twice_is_stable() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let (mut handle, _, _) = created(&dir);
    let path = dir.path().join("out/archive.vhp");

    let first = std::fs::read(&path).unwrap();
    handle.save().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), first);
}

#[test]
fn corrupt_headers_are_format_errors() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    created(&dir);
    let path = dir.path().join("out/archive.vhp");
    let good = std::fs::read(&path).unwrap();
    assert_eq!(&good[..4], b"\xffVHP");
    assert_eq!(good[4], VERSION);

    let cases: Vec<Box<dyn Fn(&mut Vec<u8>)>> = vec![
        Box::new(|b: &mut Vec<u8>| b[1] = b'X'),
        Box::new(|b: &mut Vec<u8>| b[4] = VERSION + 1),
        Box::new(|b: &mut Vec<u8>| b.truncate(20)),
        // Index length pointing past the end of the file.
        Box::new(|b: &mut Vec<u8>| b[8..16].copy_from_slice(&u64::MAX.to_le_bytes())),
        // First record tag.
        Box::new(|b: &mut Vec<u8>| {
            let root_len = u64::from_le_bytes(b[32..40].try_into().unwrap()) as usize;
            let tag = 32 + 8 + root_len * 8 + 8;
            b[tag] = 9;
        }),
    ];

    for (i, corrupt) in cases.iter().enumerate() {
        let mut bytes = good.clone();
        corrupt(&mut bytes);
        let bad = dir.path().join(format!("bad-{}.vhp", i));
        std::fs::write(&bad, &bytes).unwrap();

        let mut handle = ArchiveHandle::new(options(dir.path()));
        let err = handle.read(&bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format, "case {}: {}", i, err);
    }
}

#[test]
fn create_fails_on_missing_source() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut handle = ArchiveHandle::new(options(dir.path()));
    let err = handle.create(dir.path().join("does-not-exist")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!dir.path().join("out/archive.vhp").exists());
}
