//! Archive packaging: one `.md` per document in a single `.zip`.
//!
//! `BackgroundPackager` hands the work to a dedicated worker thread and is the
//! preferred path; `ZipPackager` runs in place and doubles as the local fallback.

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::thread;

use chrono::{Datelike, NaiveDate};
use kb_logging::{kb_debug, kb_error, kb_info};
use tokio::sync::{mpsc, oneshot};
use url::Url;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::persist::AtomicFileWriter;
use crate::PortableDocument;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackagingError {
    /// The packaging worker could not be reached or dropped the request.
    #[error("packaging transport failed: {0}")]
    Transport(String),
    #[error("{0}")]
    Failed(String),
}

/// Everything one archive is built from. Filenames are already unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub project_name: String,
    pub date: NaiveDate,
    pub documents: Vec<PortableDocument>,
}

impl Bundle {
    pub fn archive_name(&self) -> String {
        archive_name(&self.project_name, self.date)
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.documents.iter().map(PortableDocument::filename).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReceipt {
    pub path: PathBuf,
    pub file_count: usize,
}

#[async_trait::async_trait]
pub trait Packager: Send + Sync {
    async fn deliver(&self, bundle: &Bundle) -> Result<PackageReceipt, PackagingError>;
}

pub fn archive_name(project_name: &str, date: NaiveDate) -> String {
    format!("{project_name}_{}.zip", date.format("%Y-%m-%d"))
}

/// Fallback project name; `archive_name` appends the date.
pub const GENERIC_PROJECT_NAME: &str = "knowledge_export";

/// Base name for the archive: the page heading snake-cased, else the last
/// meaningful URL path segment, else [`GENERIC_PROJECT_NAME`].
pub fn derive_project_name(heading: Option<&str>, url: &str) -> String {
    if let Some(name) = heading.map(snake_case).filter(|name| !name.is_empty()) {
        return name;
    }
    let from_url = Url::parse(url).ok().and_then(|parsed| {
        let segments: Vec<String> = parsed
            .path_segments()?
            .filter(|segment| is_meaningful_segment(segment))
            .map(snake_case)
            .filter(|segment| !segment.is_empty())
            .collect();
        segments.last().cloned()
    });
    from_url.unwrap_or_else(|| GENERIC_PROJECT_NAME.to_string())
}

fn snake_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Route words and opaque identifiers say nothing about the project.
fn is_meaningful_segment(segment: &str) -> bool {
    const ROUTE_WORDS: &[&str] = &["project", "projects", "knowledge", "chat", "app"];
    if segment.is_empty() || ROUTE_WORDS.iter().any(|w| w.eq_ignore_ascii_case(segment)) {
        return false;
    }
    let looks_like_id = segment.len() >= 8
        && segment
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '-' || c == '_');
    !looks_like_id
}

/// Builds the archive in memory and writes it into the output directory.
#[derive(Debug, Clone)]
pub struct ZipPackager {
    writer: AtomicFileWriter,
}

impl ZipPackager {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            writer: AtomicFileWriter::new(output_dir),
        }
    }

    pub fn build_archive(bundle: &Bundle) -> Result<Vec<u8>, PackagingError> {
        let failed = |err: &dyn std::fmt::Display| PackagingError::Failed(err.to_string());
        // Entries are stamped with the bundle date so identical bundles give identical bytes.
        let stamp = zip::DateTime::from_date_and_time(
            u16::try_from(bundle.date.year()).unwrap_or(1980),
            bundle.date.month() as u8,
            bundle.date.day() as u8,
            0,
            0,
            0,
        )
        .unwrap_or_default();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(stamp);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for document in &bundle.documents {
            zip.start_file(document.filename(), options)
                .map_err(|e| failed(&e))?;
            zip.write_all(document.body().as_bytes())
                .map_err(|e| failed(&e))?;
        }
        let cursor = zip.finish().map_err(|e| failed(&e))?;
        Ok(cursor.into_inner())
    }

    /// Blocking packaging, for callers already off the async runtime.
    pub fn package(&self, bundle: &Bundle) -> Result<PackageReceipt, PackagingError> {
        let bytes = Self::build_archive(bundle)?;
        let path = self
            .writer
            .write_new(&bundle.archive_name(), &bytes)
            .map_err(|e| PackagingError::Failed(e.to_string()))?;
        kb_info!(
            "Wrote {} documents ({} bytes) to {:?}",
            bundle.documents.len(),
            bytes.len(),
            path
        );
        Ok(PackageReceipt {
            path,
            file_count: bundle.documents.len(),
        })
    }
}

#[async_trait::async_trait]
impl Packager for ZipPackager {
    /// Runs `package` on the blocking pool; zip building and fsync stay off the async workers.
    async fn deliver(&self, bundle: &Bundle) -> Result<PackageReceipt, PackagingError> {
        let packager = self.clone();
        let bundle = bundle.clone();
        tokio::task::spawn_blocking(move || packager.package(&bundle))
            .await
            .map_err(|e| PackagingError::Failed(format!("packaging task aborted: {e}")))?
    }
}

type Job = (Bundle, oneshot::Sender<Result<PackageReceipt, PackagingError>>);

/// Forwards bundles to a packaging worker thread.
pub struct BackgroundPackager {
    jobs: mpsc::UnboundedSender<Job>,
}

impl BackgroundPackager {
    pub fn spawn(packager: ZipPackager) -> Result<Self, PackagingError> {
        let (jobs, mut inbox) = mpsc::unbounded_channel::<Job>();
        thread::Builder::new()
            .name("kb-packager".to_string())
            .spawn(move || {
                while let Some((bundle, reply)) = inbox.blocking_recv() {
                    let result = packager.package(&bundle);
                    if let Err(err) = &result {
                        kb_error!("Background packaging failed: {}", err);
                    }
                    if reply.send(result).is_err() {
                        kb_debug!("Packaging requester went away before the reply");
                    }
                }
                kb_debug!("Packaging worker stopped");
            })
            .map_err(|e| PackagingError::Failed(format!("cannot start packaging worker: {e}")))?;
        Ok(Self { jobs })
    }

    /// A packager whose worker is already gone; every delivery is a transport failure.
    pub fn disconnected() -> Self {
        let (jobs, _) = mpsc::unbounded_channel::<Job>();
        Self { jobs }
    }
}

#[async_trait::async_trait]
impl Packager for BackgroundPackager {
    async fn deliver(&self, bundle: &Bundle) -> Result<PackageReceipt, PackagingError> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send((bundle.clone(), reply))
            .map_err(|_| PackagingError::Transport("packaging worker is not running".into()))?;
        response
            .await
            .map_err(|_| PackagingError::Transport("packaging worker dropped the request".into()))?
    }
}
