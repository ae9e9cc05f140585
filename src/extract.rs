use std::path::Path;

use crate::error::{Error, Result};

/// Recovers the text of a page range from a source document.
pub trait TextExtractor: Send + Sync {
    /// Extract pages `start..=end` (1-based) from `source`.
    fn extract(&self, source: &Path, start: u64, end: u64) -> Result<String>;
}

/// Extracts text from PDF pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfPageExtractor;

impl TextExtractor for PdfPageExtractor {
    fn extract(&self, source: &Path, start: u64, end: u64) -> Result<String> {
        validate_range(start, end)?;

        let mut doc = pdf_oxide::PdfDocument::open(source).map_err(|e| {
            Error::Extraction(format!("{}: {e}", source.display()))
        })?;

        let mut pages = Vec::new();
        for page in start..=end {
            let text = doc.extract_text((page - 1) as usize).map_err(|e| {
                Error::Extraction(format!(
                    "{} page {page}: {e}",
                    source.display()
                ))
            })?;
            pages.push(text);
        }
        Ok(pages.join("\n"))
    }
}

fn validate_range(start: u64, end: u64) -> Result<()> {
    if start == 0 || end < start {
        return Err(Error::Extraction(format!(
            "invalid page range {start}-{end}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_ranges() {
        assert!(validate_range(1, 1).is_ok());
        assert!(validate_range(2, 5).is_ok());
        assert!(matches!(validate_range(0, 3), Err(Error::Extraction(_))));
        assert!(matches!(validate_range(4, 3), Err(Error::Extraction(_))));
    }

    #[test]
    fn missing_file_is_an_extraction_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = PdfPageExtractor
            .extract(&tmp.path().join("absent.pdf"), 1, 1)
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(msg) if msg.contains("absent.pdf")));
    }
}
