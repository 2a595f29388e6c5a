mod common;

use std::fs::File;
use std::io::Read;
use std::sync::{Arc, Mutex};

use common::{init_logging, test_config, ScriptedEntry, ScriptedPage};
use kb_core::{BatchPhase, FailureKind};
use kb_engine::{Bundle, Harvester, PackageReceipt, Packager, PackagingError, ZipPackager};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Records the bundle it is handed, then fails the way it was told to.
struct RefusingPackager {
    error: PackagingError,
    seen: Mutex<Vec<String>>,
}

impl RefusingPackager {
    fn new(error: PackagingError) -> Self {
        Self {
            error,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl Packager for RefusingPackager {
    async fn deliver(&self, bundle: &Bundle) -> Result<PackageReceipt, PackagingError> {
        *self.seen.lock().unwrap() = bundle.file_names().iter().map(|s| s.to_string()).collect();
        Err(self.error.clone())
    }
}

fn three_entries() -> Vec<ScriptedEntry> {
    vec![
        ScriptedEntry::new("Meeting notes", "<p>Hello</p><p>World</p>"),
        ScriptedEntry::new("My Notes: v1/2", "<p>Second <b>document</b></p>"),
        ScriptedEntry::new("Roadmap", "Plain text roadmap"),
    ]
}

fn zip_entries(path: &std::path::Path) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut body = String::new();
            file.read_to_string(&mut body).unwrap();
            (file.name().to_string(), body)
        })
        .collect()
}

#[tokio::test]
async fn exports_every_entry_in_discovery_order() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let harvester = Harvester::new(config, Arc::new(ZipPackager::new(temp.path().to_path_buf())));
    let page = ScriptedPage::new(three_entries());

    let report = harvester.run(&page).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.view.stats.discovered, 3);
    assert_eq!(report.view.stats.failed_items, 0);
    assert_eq!(page.open_entry(), None);

    let archive = report.archive.clone().unwrap();
    assert_eq!(
        archive.file_name().unwrap().to_str().unwrap(),
        "research_notes_2024-05-17.zip"
    );
    let files = zip_entries(&archive);
    let names: Vec<&str> = files.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["Meeting_notes.md", "My_Notes_v12.md", "Roadmap.md"]);
    assert_eq!(
        files[0].1,
        "---\ntitle: \"Meeting notes\"\nexported_utc: 2024-05-17T08:30:00Z\n---\n\nHello\n\nWorld"
    );
    assert!(files[1].1.ends_with("\n\nSecond document"));

    let notice = report.notice.unwrap();
    assert!(!notice.blocking);
    assert!(notice.summary.starts_with("Exported 3 of 3 documents to "));
}

#[tokio::test]
async fn one_broken_entry_costs_exactly_one_document() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let harvester = Harvester::new(
        test_config(temp.path()),
        Arc::new(ZipPackager::new(temp.path().to_path_buf())),
    );
    let mut entries = three_entries();
    entries[1] = entries[1].clone().broken();
    let page = ScriptedPage::new(entries);

    let report = harvester.run(&page).await.unwrap();

    assert_eq!(report.view.phase, BatchPhase::Completed);
    assert_eq!(report.documents.len(), 2);
    assert_eq!(report.view.stats.failed_items, 1);
    assert_eq!(report.view.stats.interaction_failures, 1);
    let names: Vec<&str> = report.documents.iter().map(|d| d.filename()).collect();
    assert_eq!(names, vec!["Meeting_notes.md", "Roadmap.md"]);
}

#[tokio::test]
async fn empty_page_fails_without_touching_it() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let harvester = Harvester::new(
        test_config(temp.path()),
        Arc::new(ZipPackager::new(temp.path().to_path_buf())),
    );
    let page = ScriptedPage::new(Vec::new());

    let report = harvester.run(&page).await.unwrap();

    assert_eq!(report.failure(), Some(&FailureKind::NoDocumentsFound));
    assert_eq!(page.click_count(), 0);
    assert!(page.keys().is_empty());
    assert!(report.notice.unwrap().blocking);
    assert!(report.archive.is_none());
}

#[tokio::test]
async fn transport_failure_falls_back_to_local_archive_with_same_files() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let refusing = Arc::new(RefusingPackager::new(PackagingError::Transport(
        "worker gone".to_string(),
    )));
    let harvester = Harvester::new(test_config(temp.path()), refusing.clone());
    let page = ScriptedPage::new(three_entries());

    let report = harvester.run(&page).await.unwrap();

    assert!(report.succeeded());
    assert!(report.view.stats.used_local_fallback);
    assert!(report
        .view
        .recovered
        .iter()
        .any(|kind| matches!(kind, FailureKind::PackagingTransportFailed(_))));

    let offered = refusing.seen.lock().unwrap().clone();
    let written: Vec<String> = zip_entries(&report.archive.unwrap())
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(written, offered);
}

#[tokio::test]
async fn packaging_failure_is_fatal() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let harvester = Harvester::new(
        test_config(temp.path()),
        Arc::new(RefusingPackager::new(PackagingError::Failed("disk full".to_string()))),
    );
    let page = ScriptedPage::new(three_entries());

    let report = harvester.run(&page).await.unwrap();

    assert_eq!(
        report.failure(),
        Some(&FailureKind::PackagingFailed("disk full".to_string()))
    );
    assert_eq!(
        report.view.last_summary.as_deref(),
        Some("Export failed: packaging failed: disk full")
    );
}

#[tokio::test]
async fn duplicate_titles_get_numbered_files() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let harvester = Harvester::new(
        test_config(temp.path()),
        Arc::new(ZipPackager::new(temp.path().to_path_buf())),
    );
    let page = ScriptedPage::new(vec![
        ScriptedEntry::new("Notes", "first"),
        ScriptedEntry::new("Notes", "second"),
    ]);

    let report = harvester.run(&page).await.unwrap();

    let names: Vec<&str> = report.documents.iter().map(|d| d.filename()).collect();
    assert_eq!(names, vec!["Notes.md", "Notes_2.md"]);
}

#[tokio::test]
async fn entries_without_controls_are_opened_by_clicking_the_entry() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let harvester = Harvester::new(
        test_config(temp.path()),
        Arc::new(ZipPackager::new(temp.path().to_path_buf())),
    );
    let page = ScriptedPage::new(vec![
        ScriptedEntry::new("Alpha", "alpha body").without_control(),
        ScriptedEntry::new("Beta", "beta body").without_control(),
    ])
    .without_close_button();

    let report = harvester.run(&page).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.documents.len(), 2);
    assert_eq!(page.keys(), vec!["Escape".to_string(), "Escape".to_string()]);
    assert!(report.documents[1].body().ends_with("\n\nbeta body"));
}

#[tokio::test]
async fn archive_falls_back_to_generic_name_when_heading_and_url_say_nothing() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let harvester = Harvester::new(
        test_config(temp.path()),
        Arc::new(ZipPackager::new(temp.path().to_path_buf())),
    );
    let page = ScriptedPage::new(three_entries()).without_heading();

    let report = harvester.run(&page).await.unwrap();

    assert_eq!(
        report.archive.unwrap().file_name().unwrap().to_str().unwrap(),
        "knowledge_export_2024-05-17.zip"
    );
}

#[tokio::test]
async fn entries_shifted_by_a_new_arrival_are_still_exported() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let harvester = Harvester::new(
        test_config(temp.path()),
        Arc::new(ZipPackager::new(temp.path().to_path_buf())),
    );
    let page = ScriptedPage::new(vec![
        ScriptedEntry::new("Alpha", "first"),
        ScriptedEntry::new("Beta", "second"),
        ScriptedEntry::new("Delta", "third"),
    ])
    .with_arrival_after_first_close(ScriptedEntry::new("Gamma", "late"));

    let report = harvester.run(&page).await.unwrap();

    assert!(report.succeeded());
    let names: Vec<&str> = report.documents.iter().map(|doc| doc.filename()).collect();
    assert_eq!(names, vec!["Alpha.md", "Beta.md", "Delta.md"]);
    assert!(report.documents[1].body().ends_with("\n\nsecond"));
}
