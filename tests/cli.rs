use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

fn bin(name: &str) -> Command {
    let mut cmd = Command::cargo_bin(name).unwrap();
    cmd.env_remove("RUST_LOG").env_remove("ZIPWRAP_CODEPAGE");
    cmd
}

#[test]
fn zip_then_unzip_a_tree() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempdir()?;
    write_files(
        root.path(),
        &[("d1/f1", "content1"), ("d1/d2/f2", "content2"), ("d1/d2/d3/f3", "content3")],
    );
    let archive = root.path().join("test.zip");
    let out = root.path().join("unzip");

    bin("zip")
        .arg(&archive)
        .arg(root.path().join("d1"))
        .assert()
        .success()
        .stdout(predicate::str::contains("successfully"));

    bin("unzip").arg(&archive).arg(&out).assert().success();

    assert_eq!(fs::read_to_string(out.join("d1/f1"))?, "content1");
    assert_eq!(fs::read_to_string(out.join("d1/d2/f2"))?, "content2");
    assert_eq!(fs::read_to_string(out.join("d1/d2/d3/f3"))?, "content3");
    Ok(())
}

#[test]
fn wildcard_argument_is_expanded_by_the_archiver() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempdir()?;
    write_files(
        root.path(),
        &[("d1/f1", "content1"), ("d1/d2/f2", "content2"), ("d1/d2/d22/f22", "content22")],
    );
    let archive = root.path().join("test.zip");
    let out = root.path().join("unzip");

    bin("zip")
        .arg(&archive)
        .arg(format!("{}/d1/*2", root.path().display()))
        .assert()
        .success();
    bin("unzip").arg(&archive).arg(&out).assert().success();

    assert!(!out.join("f1").exists());
    assert_eq!(fs::read_to_string(out.join("d2/f2"))?, "content2");
    assert_eq!(fs::read_to_string(out.join("d2/d22/f22"))?, "content22");
    Ok(())
}

#[test]
fn legacy_variant_round_trips_cjk_names_in_gbk() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempdir()?;
    write_files(root.path(), &[("目录1/目录2/文件2", "内容2")]);
    let archive = root.path().join("测试.zip");
    let out = root.path().join("解压");

    bin("zipa")
        .env("ZIPWRAP_CODEPAGE", "cp936")
        .arg(&archive)
        .arg(root.path().join("目录1"))
        .assert()
        .success();

    // Names are GBK bytes, not UTF-8
    let bytes = fs::read(&archive)?;
    assert!(!bytes.windows("目录1".len()).any(|w| w == "目录1".as_bytes()));

    bin("unzipa")
        .env("ZIPWRAP_CODEPAGE", "cp936")
        .arg(&archive)
        .arg(&out)
        .assert()
        .success();
    assert_eq!(fs::read_to_string(out.join("目录1/目录2/文件2"))?, "内容2");
    Ok(())
}

#[test]
fn legacy_variant_rejects_names_the_codepage_cannot_hold() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempdir()?;
    write_files(root.path(), &[("目录1/文件1", "内容1")]);
    let archive = root.path().join("test.zip");

    bin("zipa")
        .env("ZIPWRAP_CODEPAGE", "cp437")
        .arg(&archive)
        .arg(root.path().join("目录1"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot encode"));
    assert!(!archive.exists());
    Ok(())
}

#[test]
fn list_modes() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempdir()?;
    write_files(root.path(), &[("d1/f1", "content1")]);
    let archive = root.path().join("test.zip");

    bin("zip").arg("-q").arg(&archive).arg(root.path().join("d1")).assert().success();

    bin("unzip")
        .arg("-l")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("d1/").and(predicate::str::contains("d1/f1")));

    bin("unzip")
        .arg("-v")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("Length").and(predicate::str::contains("1 files")));
    Ok(())
}

#[test]
fn failures_exit_non_zero() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempdir()?;
    let archive = root.path().join("test.zip");

    bin("zip")
        .arg(&archive)
        .arg(root.path().join("missing"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such file or directory"));

    bin("zip")
        .arg(&archive)
        .arg(format!("{}/*.nothing", root.path().display()))
        .assert()
        .failure()
        .stderr(predicate::str::contains("No files matched"));

    fs::write(&archive, b"definitely not a zip file")?;
    bin("unzip")
        .arg(&archive)
        .arg(root.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Corrupt archive"));
    Ok(())
}
