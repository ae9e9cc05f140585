//! Outline files and source documents stored in the data directory.

use std::path::{Path, PathBuf};

use crate::{
    data_dir::DataDir,
    error::Result,
    outline::OutlineDocument,
};

const OUTLINE_SUFFIX: &str = "_structure.json";
const SOURCE_EXTENSIONS: &[&str] = &["", ".pdf", ".md", ".markdown"];
const STRIPPED_EXTENSIONS: &[&str] = &[".pdf", ".md", ".markdown"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Page-addressable documents; sections are recovered by page range.
    Paginated,
    Markdown,
    Other,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("pdf") => Self::Paginated,
            Some("md" | "markdown") => Self::Markdown,
            _ => Self::Other,
        }
    }
}

/// A located source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub kind: SourceKind,
}

/// An outline file together with its parsed contents.
#[derive(Debug, Clone)]
pub struct LibraryDocument {
    /// File name of the outline, e.g. `report_structure.json`.
    pub file: String,
    pub doc: OutlineDocument,
}

#[derive(Debug, Clone)]
pub struct Library {
    results_dir: PathBuf,
    uploads_dir: PathBuf,
}

impl Library {
    pub fn new(results_dir: PathBuf, uploads_dir: PathBuf) -> Self {
        Self {
            results_dir,
            uploads_dir,
        }
    }

    pub fn from_data_dir(data_dir: &DataDir) -> Result<Self> {
        Ok(Self::new(data_dir.results_dir()?, data_dir.uploads_dir()?))
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn outline_path(&self, doc_name: &str) -> PathBuf {
        self.results_dir.join(format!("{doc_name}{OUTLINE_SUFFIX}"))
    }

    /// Load the outline for `doc_name`.
    ///
    /// Document names may carry the source extension (`report.pdf`), while
    /// the outline file is usually keyed by the bare stem, so both are tried.
    pub fn load_outline(
        &self,
        doc_name: &str,
    ) -> Result<Option<OutlineDocument>> {
        for candidate in name_candidates(doc_name) {
            let path = self.outline_path(&candidate);
            if path.is_file() {
                return OutlineDocument::from_path(&path).map(Some);
            }
        }
        Ok(None)
    }

    /// Find the uploaded source for `doc_name`, if any.
    pub fn source_path(&self, doc_name: &str) -> Option<SourceDocument> {
        SOURCE_EXTENSIONS
            .iter()
            .map(|ext| self.uploads_dir.join(format!("{doc_name}{ext}")))
            .find(|path| path.is_file())
            .map(|path| SourceDocument {
                kind: SourceKind::from_path(&path),
                path,
            })
    }

    /// File names of every outline, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        if !self.results_dir.is_dir() {
            return Ok(files);
        }
        for entry in std::fs::read_dir(&self.results_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && name.ends_with(OUTLINE_SUFFIX)
            {
                files.push(name.to_string());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Parse every outline in the library.
    ///
    /// Unreadable files are skipped with a warning. A missing `doc_name`
    /// is filled from the file stem.
    pub fn load_all(&self) -> Result<Vec<LibraryDocument>> {
        let mut docs = Vec::new();
        for file in self.list()? {
            let path = self.results_dir.join(&file);
            match OutlineDocument::from_path(&path) {
                Ok(mut doc) => {
                    if doc.doc_name.trim().is_empty() {
                        doc.doc_name = stem_of(&file).to_string();
                    }
                    docs.push(LibraryDocument { file, doc });
                }
                Err(e) => {
                    tracing::warn!(file = %file, error = %e, "skipping unreadable outline");
                }
            }
        }
        Ok(docs)
    }

    /// Persist an outline under `doc_name`, replacing any existing file.
    pub fn save_outline(
        &self,
        doc_name: &str,
        doc: &OutlineDocument,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.results_dir)?;
        let path = self.outline_path(doc_name);
        std::fs::write(&path, serde_json::to_vec_pretty(doc)?)?;
        Ok(path)
    }

    pub fn remove_outline(&self, doc_name: &str) -> Result<bool> {
        let path = self.outline_path(doc_name);
        if path.is_file() {
            std::fs::remove_file(&path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Delete the uploaded source of `doc_name`, if there is one.
    pub fn remove_source(&self, doc_name: &str) -> Result<bool> {
        match self.source_path(doc_name) {
            Some(source) => {
                std::fs::remove_file(&source.path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Strip the outline suffix from a file name.
pub fn stem_of(file: &str) -> &str {
    file.strip_suffix(OUTLINE_SUFFIX).unwrap_or(file)
}

/// Key under which the outline of `doc_name` is stored: the name without a
/// source extension.
pub fn outline_key(doc_name: &str) -> &str {
    STRIPPED_EXTENSIONS
        .iter()
        .find_map(|ext| doc_name.strip_suffix(ext).filter(|s| !s.is_empty()))
        .unwrap_or(doc_name)
}

fn name_candidates(doc_name: &str) -> Vec<String> {
    let mut names = vec![doc_name.to_string()];
    for ext in STRIPPED_EXTENSIONS {
        if let Some(stem) = doc_name.strip_suffix(ext)
            && !stem.is_empty()
        {
            names.push(stem.to_string());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_library() -> (tempfile::TempDir, Library) {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let library = Library::from_data_dir(&data_dir).unwrap();
        (tmp, library)
    }

    fn outline(name: &str) -> OutlineDocument {
        serde_json::from_value(serde_json::json!({
            "doc_name": name,
            "structure": [{"node_id": "1", "title": "Root"}]
        }))
        .unwrap()
    }

    #[test]
    fn source_kind_by_extension() {
        assert_eq!(
            SourceKind::from_path(Path::new("a/report.PDF")),
            SourceKind::Paginated
        );
        assert_eq!(
            SourceKind::from_path(Path::new("notes.md")),
            SourceKind::Markdown
        );
        assert_eq!(
            SourceKind::from_path(Path::new("notes")),
            SourceKind::Other
        );
    }

    #[test]
    fn save_load_and_remove_outline() {
        let (_tmp, library) = test_library();

        assert!(library.load_outline("report").unwrap().is_none());

        library.save_outline("report", &outline("report")).unwrap();
        let loaded = library.load_outline("report").unwrap().unwrap();
        assert_eq!(loaded.doc_name, "report");

        assert!(library.remove_outline("report").unwrap());
        assert!(!library.remove_outline("report").unwrap());
    }

    #[test]
    fn outline_lookup_strips_source_extension() {
        let (_tmp, library) = test_library();
        library.save_outline("report", &outline("report.pdf")).unwrap();

        let loaded = library.load_outline("report.pdf").unwrap().unwrap();
        assert_eq!(loaded.doc_name, "report.pdf");
    }

    #[test]
    fn source_path_tries_known_extensions() {
        let (tmp, library) = test_library();
        let uploads = tmp.path().join("uploads");
        std::fs::write(uploads.join("manual.pdf"), b"%PDF-1.4").unwrap();

        let source = library.source_path("manual").unwrap();
        assert_eq!(source.path, uploads.join("manual.pdf"));
        assert_eq!(source.kind, SourceKind::Paginated);

        assert!(library.source_path("absent").is_none());
    }

    #[test]
    fn remove_source_deletes_upload() {
        let (tmp, library) = test_library();
        let upload = tmp.path().join("uploads").join("notes.md");
        std::fs::write(&upload, "# Notes").unwrap();

        assert!(library.remove_source("notes").unwrap());
        assert!(!upload.exists());
        assert!(!library.remove_source("notes").unwrap());
    }

    #[test]
    fn load_all_fills_missing_names_and_skips_garbage() {
        let (tmp, library) = test_library();
        let results = tmp.path().join("results");

        library.save_outline("b", &outline("Bee")).unwrap();
        std::fs::write(
            results.join("a_structure.json"),
            r#"{"structure": []}"#,
        )
        .unwrap();
        std::fs::write(results.join("broken_structure.json"), "{ nope")
            .unwrap();
        std::fs::write(results.join("ignored.txt"), "x").unwrap();

        let docs = library.load_all().unwrap();
        let names: Vec<_> =
            docs.iter().map(|d| d.doc.doc_name.as_str()).collect();
        assert_eq!(names, vec!["a", "Bee"]);
        assert_eq!(docs[1].file, "b_structure.json");
    }

    #[test]
    fn stem_of_strips_suffix() {
        assert_eq!(stem_of("report_structure.json"), "report");
        assert_eq!(stem_of("other.json"), "other.json");
    }

    #[test]
    fn outline_key_drops_source_extension() {
        assert_eq!(outline_key("report.pdf"), "report");
        assert_eq!(outline_key("notes.markdown"), "notes");
        assert_eq!(outline_key("plain"), "plain");
        assert_eq!(outline_key(".pdf"), ".pdf");
    }
}
