use std::collections::HashSet;

use crate::PortableDocument;

pub const MAX_FILENAME_CHARS: usize = 100;
const EXTENSION: &str = ".md";
const MAX_TOTAL_CHARS: usize = MAX_FILENAME_CHARS + 1 + EXTENSION.len();

/// Windows-safe `.md` filename for a document title.
///
/// Unsafe characters are removed, whitespace runs become a single `_`.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title.chars().filter(|c| !is_forbidden(*c)).collect();
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    let mut stem: String = joined
        .trim_matches(&['_', '.'][..])
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect();
    if stem.is_empty() {
        stem = "untitled".to_string();
    }
    if let Some(base_len) = reserved_base_len(&stem) {
        stem.insert(base_len, '_');
    }
    format!("{stem}{EXTENSION}")
}

/// Later documents whose names collide (case-insensitively) with an earlier
/// one get `_2`, `_3`, ... before the extension. Order is preserved.
pub fn dedupe_filenames(documents: Vec<PortableDocument>) -> Vec<PortableDocument> {
    let mut taken: HashSet<String> = HashSet::new();
    documents
        .into_iter()
        .map(|document| {
            if taken.insert(document.filename().to_lowercase()) {
                return document;
            }
            let stem = document
                .filename()
                .strip_suffix(EXTENSION)
                .unwrap_or(document.filename())
                .to_string();
            let mut counter = 2;
            loop {
                let candidate = suffixed(&stem, counter);
                if taken.insert(candidate.to_lowercase()) {
                    return document.with_filename(candidate);
                }
                counter += 1;
            }
        })
        .collect()
}

fn suffixed(stem: &str, counter: usize) -> String {
    let suffix = format!("_{counter}");
    let room = MAX_TOTAL_CHARS - EXTENSION.len() - suffix.len();
    let short: String = stem.chars().take(room).collect();
    format!("{short}{suffix}{EXTENSION}")
}

fn is_forbidden(c: char) -> bool {
    matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
}

/// Byte length of the device-name part when `name` starts with a reserved
/// Windows device (`CON`, `nul.txt`, ...).
fn reserved_base_len(name: &str) -> Option<usize> {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let base = name.split('.').next().unwrap_or(name);
    RESERVED
        .iter()
        .any(|r| r.eq_ignore_ascii_case(base))
        .then_some(base.len())
}
