use std::error::Error;
use std::fs;
use std::process::{Command, Output};
use tempfile::tempdir;

fn ardat_command() -> Command {
    Command::new(env!("CARGO_BIN_EXE_ardat"))
}

fn run(args: &[&str]) -> Result<Output, Box<dyn Error>> {
    Ok(ardat_command().args(args).output()?)
}

const KEY: &str = "0101010101010101010101010101010101010101010101010101010101010101";

#[test]
fn cli_end_to_end_flow() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let src = dir.path().join("docs");
    fs::create_dir_all(src.join("drafts"))?;
    fs::write(src.join("letter.txt"), b"Dear reader,")?;
    fs::write(src.join("drafts/wip.md"), b"# not yet")?;
    let vault = dir.path().join("docs.ardat");
    let out = dir.path().join("restored");
    fs::create_dir(&out)?;

    let archive = run(&[
        "archive",
        "--key",
        KEY,
        "--mode",
        "ctr",
        src.to_str().unwrap(),
        vault.to_str().unwrap(),
    ])?;
    assert!(
        archive.status.success(),
        "archive command failed: {}",
        String::from_utf8_lossy(&archive.stderr)
    );
    assert!(String::from_utf8(archive.stdout)?.contains("Archived 4 entries"));

    let info = run(&["info", vault.to_str().unwrap()])?;
    let info_stdout = String::from_utf8(info.stdout)?;
    assert!(info_stdout.contains("Version: 0.1"));
    assert!(info_stdout.contains("docs/letter.txt"));
    assert!(info_stdout.contains("[AESEntity]"));

    let json = run(&["info", "--json", vault.to_str().unwrap()])?;
    let listing: serde_json::Value = serde_json::from_slice(&json.stdout)?;
    assert_eq!(listing["entries"].as_array().map(Vec::len), Some(4));

    let extract = run(&[
        "extract",
        "--key",
        KEY,
        vault.to_str().unwrap(),
        out.to_str().unwrap(),
    ])?;
    assert!(
        extract.status.success(),
        "extract command failed: {}",
        String::from_utf8_lossy(&extract.stderr)
    );
    assert_eq!(fs::read(out.join("docs/letter.txt"))?, b"Dear reader,");
    assert_eq!(fs::read(out.join("docs/drafts/wip.md"))?, b"# not yet");

    Ok(())
}

#[test]
fn cli_wrong_key_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let src = dir.path().join("secret.txt");
    fs::write(&src, b"classified")?;
    let vault = dir.path().join("secret.ardat");
    let out = dir.path().join("out");
    fs::create_dir(&out)?;

    let archive = run(&["archive", "--key", &KEY[..32], src.to_str().unwrap(), vault.to_str().unwrap()])?;
    assert!(archive.status.success());

    let wrong = "02".repeat(16);
    let extract = run(&["extract", "--key", &wrong, vault.to_str().unwrap(), out.to_str().unwrap()])?;
    assert!(!extract.status.success());
    assert!(String::from_utf8_lossy(&extract.stderr).contains("hash mismatch"));
    Ok(())
}

#[test]
fn cli_rejects_existing_destination() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let src = dir.path().join("a.txt");
    let vault = dir.path().join("a.ardat");
    fs::write(&src, b"a")?;
    fs::write(&vault, b"occupied")?;

    let archive = run(&["archive", src.to_str().unwrap(), vault.to_str().unwrap()])?;
    assert!(!archive.status.success());
    assert!(String::from_utf8_lossy(&archive.stderr).contains("already exists"));
    assert_eq!(fs::read(&vault)?, b"occupied");
    Ok(())
}

#[test]
fn cli_mode_without_key_is_rejected() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let src = dir.path().join("a.txt");
    fs::write(&src, b"a")?;
    let vault = dir.path().join("a.ardat");

    let archive = run(&["archive", "--mode", "cbc", src.to_str().unwrap(), vault.to_str().unwrap()])?;
    assert!(!archive.status.success());
    assert!(!vault.exists());
    Ok(())
}

#[test]
fn cli_version_flag() -> Result<(), Box<dyn Error>> {
    let version = run(&["--version"])?;
    assert!(version.status.success());
    assert!(String::from_utf8(version.stdout)?.starts_with("ardat "));
    Ok(())
}
