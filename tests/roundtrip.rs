//! Archive-then-extract scenarios run through the library API.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use zipwrap::{
    collector, write_archive, Codepage, EncodingPolicy, EncodingResolver, Error, LocalFileReader,
    SourceSpec, ZipExtractor,
};

const CJK_FILES: [(&str, &str); 3] = [
    ("目录1/文件1", "内容1"),
    ("目录1/目录2/文件2", "内容2"),
    ("目录1/目录2/目录3/文件3", "内容3"),
];

fn utf8() -> EncodingResolver {
    EncodingResolver::new(EncodingPolicy::Utf8, Codepage::Ibm437)
}

fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

fn arg(root: &Path, rel: &str) -> SourceSpec {
    SourceSpec::parse(&format!("{}/{}", root.display(), rel))
}

/// Archive `sources` into `root/test.zip`, then extract into `root/unzip`.
async fn round_trip(root: &Path, sources: &[SourceSpec], resolver: EncodingResolver, level: u32) -> zipwrap::Result<()> {
    let archive = root.join("test.zip");
    let entries = collector::collect(sources)?;
    write_archive(&archive, &entries, resolver, level).await?;

    let reader = Arc::new(LocalFileReader::new(&archive)?);
    ZipExtractor::new(reader, resolver)
        .extract_all(&root.join("unzip"))
        .await?;
    Ok(())
}

fn check_file(path: &Path, expected: Option<&str>) {
    let actual = fs::read_to_string(path).ok();
    assert_eq!(actual.as_deref(), expected, "content of {}", path.display());
}

#[tokio::test]
async fn single_file() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &[("f1", "content")]);

    round_trip(dir.path(), &[arg(dir.path(), "f1")], utf8(), 9).await.unwrap();
    check_file(&dir.path().join("unzip/f1"), Some("content"));
}

#[tokio::test]
async fn single_directory() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &[("d1/f1", "content")]);

    round_trip(dir.path(), &[arg(dir.path(), "d1")], utf8(), 9).await.unwrap();
    check_file(&dir.path().join("unzip/d1/f1"), Some("content"));
}

#[tokio::test]
async fn directory_tree() {
    let dir = TempDir::new().unwrap();
    write_files(
        dir.path(),
        &[
            ("d1/f1", "content1"),
            ("d1/d2/f2", "content2"),
            ("d1/d2/d3/f3", "content3"),
        ],
    );
    fs::create_dir_all(dir.path().join("d1/empty")).unwrap();

    round_trip(dir.path(), &[arg(dir.path(), "d1")], utf8(), 9).await.unwrap();
    let out = dir.path().join("unzip");
    check_file(&out.join("d1/f1"), Some("content1"));
    check_file(&out.join("d1/d2/f2"), Some("content2"));
    check_file(&out.join("d1/d2/d3/f3"), Some("content3"));
    assert!(out.join("d1/empty").is_dir());
}

#[tokio::test]
async fn wildcard_single_level() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &[("d1/f1", "content1")]);

    round_trip(dir.path(), &[arg(dir.path(), "d1/*")], utf8(), 9).await.unwrap();
    check_file(&dir.path().join("unzip/f1"), Some("content1"));
    assert!(!dir.path().join("unzip/d1").exists());
}

#[tokio::test]
async fn wildcard_filtered() {
    let dir = TempDir::new().unwrap();
    write_files(
        dir.path(),
        &[
            ("d1/f1", "content1"),
            ("d1/d2/f2", "content2"),
            ("d1/d2/d22/f22", "content22"),
            ("d1/d2/d33/f33", "content33"),
        ],
    );

    round_trip(dir.path(), &[arg(dir.path(), "d1/*2")], utf8(), 9).await.unwrap();
    let out = dir.path().join("unzip");
    check_file(&out.join("f1"), None);
    check_file(&out.join("d2/f2"), Some("content2"));
    check_file(&out.join("d2/d22/f22"), Some("content22"));
    check_file(&out.join("d2/d33/f33"), Some("content33"));
}

#[tokio::test]
async fn non_ascii_names_under_utf8() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &CJK_FILES);

    round_trip(dir.path(), &[arg(dir.path(), "目录1")], utf8(), 9).await.unwrap();
    for (path, content) in CJK_FILES {
        check_file(&dir.path().join("unzip").join(path), Some(content));
    }
}

#[tokio::test]
async fn non_ascii_names_under_gbk() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &CJK_FILES);
    let gbk = EncodingResolver::new(EncodingPolicy::Legacy, Codepage::from_label("cp936").unwrap());

    round_trip(dir.path(), &[arg(dir.path(), "目录1")], gbk, 9).await.unwrap();
    for (path, content) in CJK_FILES {
        check_file(&dir.path().join("unzip").join(path), Some(content));
    }
}

#[tokio::test]
async fn non_ascii_names_without_a_matching_codepage_fail_explicitly() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &CJK_FILES);
    let ibm437 = EncodingResolver::new(EncodingPolicy::Legacy, Codepage::Ibm437);

    let err = round_trip(dir.path(), &[arg(dir.path(), "目录1")], ibm437, 9)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnencodableName { .. }));
    assert!(!dir.path().join("test.zip").exists());
}

#[tokio::test]
async fn utf8_archive_reads_under_the_legacy_variant() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &CJK_FILES);
    let archive = dir.path().join("test.zip");

    let entries = collector::collect(&[arg(dir.path(), "目录1")]).unwrap();
    write_archive(&archive, &entries, utf8(), 9).await.unwrap();

    // The flag decides how names are read, whatever the reader's policy
    let legacy = EncodingResolver::new(EncodingPolicy::Legacy, Codepage::Ibm437);
    let reader = Arc::new(LocalFileReader::new(&archive).unwrap());
    ZipExtractor::new(reader, legacy)
        .extract_all(&dir.path().join("unzip"))
        .await
        .unwrap();
    check_file(&dir.path().join("unzip/目录1/文件1"), Some("内容1"));
}

#[tokio::test]
async fn repeated_extraction_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &[("d1/f1", "content1"), ("d1/d2/f2", "content2")]);

    round_trip(dir.path(), &[arg(dir.path(), "d1")], utf8(), 9).await.unwrap();
    fs::write(dir.path().join("unzip/d1/f1"), "scribbled over").unwrap();

    let reader = Arc::new(LocalFileReader::new(&dir.path().join("test.zip")).unwrap());
    ZipExtractor::new(reader, utf8())
        .extract_all(&dir.path().join("unzip"))
        .await
        .unwrap();
    check_file(&dir.path().join("unzip/d1/f1"), Some("content1"));
    check_file(&dir.path().join("unzip/d1/d2/f2"), Some("content2"));
}

#[tokio::test]
async fn archives_are_reproducible() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &[("d1/b", "bbb"), ("d1/a", "aaa"), ("d1/c/d", "ddd")]);
    let entries = collector::collect(&[arg(dir.path(), "d1")]).unwrap();

    let first = dir.path().join("first.zip");
    let second = dir.path().join("second.zip");
    write_archive(&first, &entries, utf8(), 9).await.unwrap();
    write_archive(&second, &entries, utf8(), 9).await.unwrap();
    assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
}

#[tokio::test]
async fn corrupted_content_fails_with_checksum_mismatch() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &[("f1", "content")]);
    let archive = dir.path().join("test.zip");

    let entries = collector::collect(&[arg(dir.path(), "f1")]).unwrap();
    write_archive(&archive, &entries, utf8(), 0).await.unwrap();

    let mut bytes = fs::read(&archive).unwrap();
    let at = bytes.windows(7).position(|w| w == b"content").unwrap();
    bytes[at + 3] = b'X';
    fs::write(&archive, bytes).unwrap();

    let reader = Arc::new(LocalFileReader::new(&archive).unwrap());
    let err = ZipExtractor::new(reader, utf8())
        .extract_all(&dir.path().join("unzip"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }));
    check_file(&dir.path().join("unzip/f1"), None);
}

#[cfg(unix)]
#[tokio::test]
async fn permissions_and_mtime_survive() {
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, SystemTime};

    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &[("run.sh", "#!/bin/sh\n")]);
    let source = dir.path().join("run.sh");
    fs::set_permissions(&source, fs::Permissions::from_mode(0o751)).unwrap();
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    fs::File::options()
        .write(true)
        .open(&source)
        .unwrap()
        .set_modified(mtime)
        .unwrap();

    round_trip(dir.path(), &[arg(dir.path(), "run.sh")], utf8(), 9).await.unwrap();

    let extracted = fs::metadata(dir.path().join("unzip/run.sh")).unwrap();
    assert_eq!(extracted.permissions().mode() & 0o777, 0o751);
    let restored = extracted.modified().unwrap();
    let drift = restored
        .duration_since(mtime)
        .unwrap_or_else(|e| e.duration());
    assert!(drift <= Duration::from_secs(2), "mtime drifted by {drift:?}");
}

#[tokio::test]
async fn archive_inside_its_own_sources_is_skipped() {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &[("d1/f1", "content1")]);
    let archive = dir.path().join("d1/out.zip");
    fs::write(&archive, vec![b'z'; 5000]).unwrap();

    let entries = collector::collect(&[arg(dir.path(), "d1/*")]).unwrap();
    assert_eq!(entries.len(), 2);
    let written = write_archive(&archive, &entries, utf8(), 9).await.unwrap();
    assert_eq!(written, 1);

    let reader = Arc::new(LocalFileReader::new(&archive).unwrap());
    let names: Vec<String> = ZipExtractor::new(reader, utf8())
        .list_files()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.file_name)
        .collect();
    assert_eq!(names, ["f1"]);
}

#[cfg(unix)]
#[tokio::test]
async fn read_only_files_are_replaced_on_re_extraction() {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let dir = TempDir::new().unwrap();
    write_files(dir.path(), &[("ro", "frozen")]);
    fs::set_permissions(dir.path().join("ro"), fs::Permissions::from_mode(0o444)).unwrap();

    round_trip(dir.path(), &[arg(dir.path(), "ro")], utf8(), 9).await.unwrap();
    let target = dir.path().join("unzip/ro");
    let first = fs::metadata(&target).unwrap();
    assert_eq!(first.permissions().mode() & 0o777, 0o444);

    let reader = Arc::new(LocalFileReader::new(&dir.path().join("test.zip")).unwrap());
    ZipExtractor::new(reader, utf8())
        .extract_all(&dir.path().join("unzip"))
        .await
        .unwrap();

    // A new file took the old one's place; it was never reopened for writing
    let second = fs::metadata(&target).unwrap();
    assert_ne!(second.ino(), first.ino());
    assert_eq!(second.permissions().mode() & 0o777, 0o444);
    check_file(&target, Some("frozen"));
}
