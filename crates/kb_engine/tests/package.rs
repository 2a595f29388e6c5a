mod common;

use std::fs;

use chrono::NaiveDate;
use common::{fixed_now, init_logging};
use kb_core::RawDocument;
use kb_engine::{
    dedupe_filenames, normalize, BackgroundPackager, Bundle, Packager, PackagingError, ZipPackager,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn bundle() -> Bundle {
    let documents = dedupe_filenames(vec![
        normalize(&RawDocument::new("First", "one"), fixed_now()),
        normalize(&RawDocument::new("Second", "<p>two</p>"), fixed_now()),
    ]);
    Bundle {
        project_name: "research_notes".to_string(),
        date: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
        documents,
    }
}

fn names_in(bytes: Vec<u8>) -> Vec<String> {
    let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    archive.file_names().map(str::to_string).collect::<Vec<_>>()
}

#[tokio::test]
async fn zip_packager_writes_one_file_per_document() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let packager = ZipPackager::new(temp.path().join("out"));

    let receipt = packager.deliver(&bundle()).await.unwrap();

    assert_eq!(receipt.file_count, 2);
    assert_eq!(receipt.path, temp.path().join("out").join("research_notes_2024-05-17.zip"));
    let mut names = names_in(fs::read(&receipt.path).unwrap());
    names.sort();
    assert_eq!(names, vec!["First.md", "Second.md"]);
}

#[tokio::test]
async fn repeated_exports_keep_earlier_archives() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let packager = ZipPackager::new(temp.path().to_path_buf());

    let first = packager.deliver(&bundle()).await.unwrap();
    let second = packager.deliver(&bundle()).await.unwrap();

    assert!(first.path.exists());
    assert_eq!(
        second.path.file_name().unwrap().to_str().unwrap(),
        "research_notes_2024-05-17 (1).zip"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_local_deliveries_get_distinct_archives() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let packager = ZipPackager::new(temp.path().to_path_buf());
    let bundle = bundle();

    let (first, second) = tokio::join!(packager.deliver(&bundle), packager.deliver(&bundle));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_ne!(first.path, second.path);
    let mut names = vec![
        first.path.file_name().unwrap().to_string_lossy().into_owned(),
        second.path.file_name().unwrap().to_string_lossy().into_owned(),
    ];
    names.sort();
    assert_eq!(
        names,
        vec!["research_notes_2024-05-17 (1).zip", "research_notes_2024-05-17.zip"]
    );
}

#[tokio::test]
async fn background_packager_delivers_through_its_worker() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let packager = BackgroundPackager::spawn(ZipPackager::new(temp.path().to_path_buf())).unwrap();

    let receipt = packager.deliver(&bundle()).await.unwrap();

    assert!(receipt.path.exists());
    assert_eq!(receipt.file_count, 2);
}

#[tokio::test]
async fn disconnected_worker_is_a_transport_failure() {
    init_logging();
    let packager = BackgroundPackager::disconnected();

    let result = packager.deliver(&bundle()).await;

    assert!(matches!(result, Err(PackagingError::Transport(_))));
}

#[tokio::test]
async fn unwritable_output_is_a_packaging_failure() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("file");
    fs::write(&blocker, "x").unwrap();
    let packager = ZipPackager::new(blocker);

    let result = packager.deliver(&bundle()).await;

    assert!(matches!(result, Err(PackagingError::Failed(_))));
}

#[test]
fn archive_bytes_do_not_depend_on_the_output_directory() {
    let first = ZipPackager::build_archive(&bundle()).unwrap();
    let second = ZipPackager::build_archive(&bundle()).unwrap();
    assert_eq!(first, second);
}
