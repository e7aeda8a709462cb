// tests/scanner.rs

use std::error::Error;
use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use assayer::errors::AssayerError;
use assayer::fs::RealFileSystem;
use assayer::fs::mock::MockFileSystem;
use assayer::watch::{ArtifactFilter, CheckpointScanner, DEFAULT_PATTERN};

type TestResult = Result<(), Box<dyn Error>>;

fn real_scanner() -> CheckpointScanner {
    CheckpointScanner::new(Arc::new(RealFileSystem))
}

fn names(dir: &TempDir, found: &assayer::types::KnownSet) -> Vec<String> {
    let prefix = format!("{}/", dir.path().display());
    found
        .iter()
        .map(|a| a.as_str().trim_start_matches(&prefix).to_string())
        .collect()
}

#[test]
fn default_filter_picks_checkpoint_suffixes() -> TestResult {
    let dir = TempDir::new()?;
    for name in ["a.pt", "b.pth", "c.ckpt", "d.model", "e.state", "log.txt", "f.pt.tmp"] {
        fs::write(dir.path().join(name), b"x")?;
    }

    let filter = ArtifactFilter::parse(DEFAULT_PATTERN)?;
    let found = real_scanner().scan(&dir.path().to_string_lossy(), &filter)?;

    assert_eq!(
        names(&dir, &found),
        vec!["a.pt", "b.pth", "c.ckpt", "d.model", "e.state"]
    );
    Ok(())
}

#[test]
fn artifact_refs_are_directory_joined_paths() -> TestResult {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("a.pt"), b"x")?;
    let directory = dir.path().to_string_lossy().to_string();

    let found = real_scanner().scan(&directory, &ArtifactFilter::parse(DEFAULT_PATTERN)?)?;

    let only = found.iter().next().expect("one artifact");
    assert_eq!(only.as_str(), format!("{directory}/a.pt"));
    Ok(())
}

#[test]
fn dotfiles_are_skipped_and_subdirectories_are_entries() -> TestResult {
    let dir = TempDir::new()?;
    fs::write(dir.path().join(".hidden.pt"), b"x")?;
    fs::create_dir(dir.path().join("epoch_3.ckpt"))?;
    fs::create_dir(dir.path().join("nested"))?;
    fs::write(dir.path().join("nested").join("deep.pt"), b"x")?;

    let found = real_scanner().scan(
        &dir.path().to_string_lossy(),
        &ArtifactFilter::parse(DEFAULT_PATTERN)?,
    )?;

    assert_eq!(names(&dir, &found), vec!["epoch_3.ckpt"]);
    Ok(())
}

#[test]
fn regex_is_anchored_at_the_start_of_the_path() -> TestResult {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("model.pt"), b"x")?;

    // Matches somewhere in the path, but not at its start.
    let unanchored = ArtifactFilter::parse(r"model\.pt")?;
    let found = real_scanner().scan(&dir.path().to_string_lossy(), &unanchored)?;
    assert!(found.is_empty());

    let anchored = ArtifactFilter::parse(r".*model\.pt")?;
    let found = real_scanner().scan(&dir.path().to_string_lossy(), &anchored)?;
    assert_eq!(found.len(), 1);
    Ok(())
}

#[test]
fn glob_filter_matches_file_names() -> TestResult {
    let dir = TempDir::new()?;
    for name in ["epoch_1.pt", "epoch_2.pt", "best.pt"] {
        fs::write(dir.path().join(name), b"x")?;
    }

    let filter = ArtifactFilter::parse("glob:epoch_*.pt")?;
    let found = real_scanner().scan(&dir.path().to_string_lossy(), &filter)?;

    assert_eq!(names(&dir, &found), vec!["epoch_1.pt", "epoch_2.pt"]);
    Ok(())
}

#[test]
fn missing_directory_is_a_scan_failure_not_an_empty_set() -> TestResult {
    let dir = TempDir::new()?;
    let missing = dir.path().join("does-not-exist");

    let err = real_scanner()
        .scan(&missing.to_string_lossy(), &ArtifactFilter::parse(DEFAULT_PATTERN)?)
        .unwrap_err();

    assert!(matches!(err, AssayerError::ScanFailed { .. }));
    Ok(())
}

#[test]
fn mock_filesystem_scans_like_the_real_one() -> TestResult {
    let fs = MockFileSystem::new();
    fs.add_file("ckpt/a.pt", "x");
    fs.add_file("ckpt/.tmp.pt", "x");
    fs.add_file("ckpt/readme.md", "x");
    let scanner = CheckpointScanner::new(Arc::new(fs.clone()));
    let filter = ArtifactFilter::parse(DEFAULT_PATTERN)?;

    let found = scanner.scan("ckpt", &filter)?;
    let paths: Vec<&str> = found.iter().map(|a| a.as_str()).collect();
    assert_eq!(paths, vec!["ckpt/a.pt"]);

    fs.set_unreadable("ckpt");
    assert!(matches!(
        scanner.scan("ckpt", &filter),
        Err(AssayerError::ScanFailed { .. })
    ));
    Ok(())
}

#[test]
fn invalid_filters_are_rejected() {
    assert!(ArtifactFilter::parse("(unclosed").is_err());
    assert!(ArtifactFilter::parse("glob:[").is_err());
}
