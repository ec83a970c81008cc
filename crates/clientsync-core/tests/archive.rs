use std::fs;

use tempfile::TempDir;

use clientsync_core::archive::{
    archive_csv_files, sha256_file, verify_archive, ArchiveOptions, MANIFEST_NAME,
};

fn options(dir: &TempDir, delete_originals: bool) -> ArchiveOptions {
    ArchiveOptions {
        primary_csv: dir.path().join("output.csv"),
        source_dir: dir.path().to_path_buf(),
        archive_root: dir.path().join("archive"),
        delete_originals,
    }
}

fn seed_files(dir: &TempDir) {
    fs::write(dir.path().join("output.csv"), "row_id,name\n1,Ada\n").unwrap();
    fs::write(
        dir.path().join("output_backup_import_20250601_120000.csv"),
        "row_id,name\n1,Ada\n2,Grace\n",
    )
    .unwrap();
    // Not a CSV the archive should pick up.
    fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
}

#[test]
fn archive_copies_files_with_matching_checksums() {
    let dir = TempDir::new().unwrap();
    seed_files(&dir);

    let manifest = archive_csv_files(&options(&dir, false)).unwrap();
    assert_eq!(manifest.files.len(), 2);
    assert!(manifest.all_verified);
    assert!(!manifest.originals_deleted);

    let archive_dir = std::path::PathBuf::from(&manifest.archive_dir);
    for file in &manifest.files {
        assert_eq!(file.sha256_before, file.sha256_after);
        let fresh = sha256_file(&archive_dir.join(&file.archived_name)).unwrap();
        assert_eq!(fresh, file.sha256_after);

        let sidecar =
            fs::read_to_string(archive_dir.join(format!("{}.sha256", file.archived_name))).unwrap();
        assert_eq!(sidecar, format!("{}  {}\n", file.sha256_after, file.archived_name));
        assert!(archive_dir.join(format!("{}.meta.json", file.archived_name)).exists());
    }
    assert!(archive_dir.join(MANIFEST_NAME).exists());
    // Originals untouched.
    assert!(dir.path().join("output.csv").exists());
}

#[test]
fn verification_pass_accepts_a_clean_archive() {
    let dir = TempDir::new().unwrap();
    seed_files(&dir);
    let manifest = archive_csv_files(&options(&dir, false)).unwrap();

    let report = verify_archive(std::path::Path::new(&manifest.archive_dir)).unwrap();
    assert!(report.all_ok());
    assert_eq!(report.checked, 2);
    assert_eq!(report.ok, 2);
}

#[test]
fn verification_catches_a_corrupted_copy() {
    let dir = TempDir::new().unwrap();
    seed_files(&dir);
    let manifest = archive_csv_files(&options(&dir, false)).unwrap();

    let archive_dir = std::path::PathBuf::from(&manifest.archive_dir);
    let victim = archive_dir.join(&manifest.files[0].archived_name);
    fs::write(&victim, "row_id,name\n1,Tampered\n").unwrap();

    let report = verify_archive(&archive_dir).unwrap();
    assert!(!report.all_ok());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains(&manifest.files[0].archived_name));
}

#[test]
fn originals_are_deleted_only_after_verification() {
    let dir = TempDir::new().unwrap();
    seed_files(&dir);

    let manifest = archive_csv_files(&options(&dir, true)).unwrap();
    assert!(manifest.originals_deleted);
    assert!(!dir.path().join("output.csv").exists());
    assert!(!dir
        .path()
        .join("output_backup_import_20250601_120000.csv")
        .exists());
    // Non-CSV neighbors survive.
    assert!(dir.path().join("notes.txt").exists());
}

#[test]
fn empty_source_directory_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(archive_csv_files(&options(&dir, false)).is_err());
}
