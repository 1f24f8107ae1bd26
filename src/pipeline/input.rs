//! Input resolution: find the batch's source files and validate each one.
//!
//! Discovery is deterministic: eligible files are returned in lexicographic
//! file-name order so that reruns visit documents in the same sequence.
//! Validation checks existence, read permission and the `%PDF` magic bytes
//! before pdfium ever sees the file, so a bad file becomes a typed
//! [`SourceAccessError`] rather than an opaque engine failure.

use crate::error::{IngestError, SourceAccessError};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File extension (case-insensitive) of eligible source documents.
pub const SOURCE_EXTENSION: &str = "pdf";

/// Default batch directory, relative to the working directory.
pub const DEFAULT_SOURCE_DIR: &str = "WECs";

/// List eligible source files in `dir`, sorted by file name.
///
/// Subdirectories are not descended into.
pub fn discover_documents(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !dir.is_dir() {
        return Err(IngestError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| IngestError::DirectoryScanFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| IngestError::DirectoryScanFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_file() && is_source_file(&path) {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("Discovered {} source documents in {}", files.len(), dir.display());
    Ok(files)
}

/// Whether `path` has the eligible extension.
pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(SOURCE_EXTENSION))
        .unwrap_or(false)
}

/// Natural key of a document: its file name.
pub fn document_filename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Validate a local source file: it must exist, be readable, and start with `%PDF`.
pub fn validate_local(path: &Path) -> Result<(), SourceAccessError> {
    if !path.exists() {
        return Err(SourceAccessError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            match f.read_exact(&mut magic) {
                Ok(()) if &magic != b"%PDF" => Err(SourceAccessError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                }),
                Ok(()) => Ok(()),
                Err(e) => Err(SourceAccessError::Corrupt {
                    path: path.to_path_buf(),
                    detail: format!("truncated file: {e}"),
                }),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(SourceAccessError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => Err(SourceAccessError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovery_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.PDF", "c.txt", "10.pdf"] {
            fs::write(dir.path().join(name), b"%PDF-1.4").unwrap();
        }
        fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let found: Vec<String> = discover_documents(dir.path())
            .unwrap()
            .iter()
            .map(|p| document_filename(p))
            .collect();
        assert_eq!(found, vec!["10.pdf", "a.PDF", "b.pdf"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let err = discover_documents(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, IngestError::DirectoryNotFound { .. }));
    }

    #[test]
    fn validate_rejects_missing_and_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.pdf");
        assert!(matches!(
            validate_local(&missing),
            Err(SourceAccessError::FileNotFound { .. })
        ));

        let fake = dir.path().join("fake.pdf");
        fs::write(&fake, b"GIF89a").unwrap();
        assert!(matches!(
            validate_local(&fake),
            Err(SourceAccessError::NotAPdf { .. })
        ));

        let short = dir.path().join("short.pdf");
        fs::write(&short, b"%P").unwrap();
        assert!(matches!(
            validate_local(&short),
            Err(SourceAccessError::Corrupt { .. })
        ));

        let ok = dir.path().join("ok.pdf");
        fs::write(&ok, b"%PDF-1.7\n").unwrap();
        assert!(validate_local(&ok).is_ok());
    }
}
