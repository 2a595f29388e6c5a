use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use kb_logging::kb_debug;
use tempfile::NamedTempFile;
use thiserror::Error;

const MAX_RENAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("no free name for {0} in the output directory")]
    NameExhausted(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Create `dir` if needed and check that files can be created inside it.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    match fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => {
            return Err(PersistError::OutputDir(format!(
                "{} is not a directory",
                dir.display()
            )))
        }
        Ok(_) => {}
        Err(_) => fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?,
    }
    NamedTempFile::new_in(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    Ok(())
}

/// Writes whole files through a temp file in the target directory, so a
/// reader never sees a partially written archive.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Write `bytes` to `{dir}/{filename}`. An existing file of that name is
    /// kept, and the new one gets a ` (n)` suffix the way browser downloads do.
    pub fn write_new(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;
        let mut tmp = self.stage(bytes)?;

        let (stem, extension) = split_extension(filename);
        for attempt in 0..MAX_RENAME_ATTEMPTS {
            let candidate = match attempt {
                0 => filename.to_string(),
                n => format!("{stem} ({n}){extension}"),
            };
            let target = self.dir.join(&candidate);
            if target.exists() {
                continue;
            }
            kb_debug!("Persisting {} bytes to {:?}", bytes.len(), target);
            match tmp.persist_noclobber(&target) {
                Ok(_) => return Ok(target),
                // Another writer took the name between the check and the rename.
                Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => tmp = err.file,
                Err(err) => return Err(PersistError::Io(err.error)),
            }
        }
        Err(PersistError::NameExhausted(filename.to_string()))
    }

    fn stage(&self, bytes: &[u8]) -> Result<NamedTempFile, PersistError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        Ok(tmp)
    }
}

fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(dot) if dot > 0 => filename.split_at(dot),
        _ => (filename, ""),
    }
}
