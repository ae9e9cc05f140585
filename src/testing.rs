//! Deterministic stand-ins for the external services, used by unit tests.

use std::{
    collections::{HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    data_dir::DataDir,
    embedding::{EmbedFailure, EmbeddingClient, EmbeddingService, RetryPolicy},
    error::{Error, Result},
    extract::TextExtractor,
    index::SectionIndex,
    library::Library,
    llm::LanguageModel,
    outline::OutlineDocument,
    resolver::ContentResolver,
    vector_store::RedbVectorStore,
};

const BUCKETS: usize = 64;

/// Bag-of-words hashing embedder.
///
/// Texts sharing words get similar vectors. A constant bias component keeps
/// every vector non-zero.
#[derive(Default)]
pub struct FakeEmbedder {
    calls: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<EmbedFailure>>,
    empty_for: Mutex<HashSet<String>>,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue failures returned by the next requests, in order.
    pub fn fail_next(&self, failures: Vec<EmbedFailure>) {
        self.failures.lock().unwrap().extend(failures);
    }

    /// Answer requests for `text` without a vector.
    pub fn return_nothing_for(&self, text: &str) {
        self.empty_for.lock().unwrap().insert(text.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; BUCKETS + 1];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[fnv1a(&word.to_lowercase()) as usize % BUCKETS] += 1.0;
        }
        v[BUCKETS] = 0.1;
        v
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf29ce484222325, |h, b| {
        (h ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl EmbeddingService for FakeEmbedder {
    fn model(&self) -> &str {
        "fake-embedder"
    }

    async fn embed_once(
        &self,
        text: &str,
    ) -> std::result::Result<Option<Vec<f32>>, EmbedFailure> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some(failure) = self.failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        if self.empty_for.lock().unwrap().contains(text) {
            return Ok(None);
        }
        Ok(Some(Self::vector_for(text)))
    }
}

/// Language model that replays queued responses and records prompts.
///
/// An empty queue answers with an error.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: &[&str]) -> Self {
        let model = Self::new();
        for r in responses {
            model.push(r);
        }
        model
    }

    pub fn push(&self, response: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(response.to_string()));
    }

    pub fn push_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(Error::LanguageModel(message.to_string())));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(Error::LanguageModel("no scripted response".to_string()))
            })
    }
}

/// Extractor returning a fixed string per page range, or failing for
/// sources whose path contains `broken`.
#[derive(Default)]
pub struct FakeExtractor {
    calls: Mutex<Vec<(PathBuf, u64, u64)>>,
}

impl FakeExtractor {
    pub fn calls(&self) -> Vec<(PathBuf, u64, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

impl TextExtractor for FakeExtractor {
    fn extract(&self, source: &Path, start: u64, end: u64) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((source.to_path_buf(), start, end));
        if source.to_string_lossy().contains("broken") {
            return Err(Error::Extraction("corrupt file".to_string()));
        }
        Ok(format!("pages {start}-{end}"))
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_unit: Duration::ZERO,
        batch_delay: Duration::ZERO,
    }
}

/// Document "A": root "Intro" summarised as "overview", with a leaf
/// "Details" holding the text "the answer is 42".
pub fn scenario_outline() -> OutlineDocument {
    serde_json::from_value(serde_json::json!({
        "doc_name": "A",
        "doc_description": "Answers to everything",
        "structure": [{
            "node_id": "0001",
            "title": "Intro",
            "summary": "overview",
            "nodes": [{
                "node_id": "0002",
                "title": "Details",
                "text": "the answer is 42"
            }]
        }]
    }))
    .unwrap()
}

/// A data directory with an index, a library and fakes wired together.
pub struct TestEnv {
    pub tmp: tempfile::TempDir,
    pub embedder: Arc<FakeEmbedder>,
    pub extractor: Arc<FakeExtractor>,
    pub index: Arc<SectionIndex>,
    pub library: Library,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let store =
            Arc::new(RedbVectorStore::open(&data_dir.index_db()).unwrap());
        let embedder = Arc::new(FakeEmbedder::new());
        let client = EmbeddingClient::new(embedder.clone(), fast_policy());
        let index = Arc::new(SectionIndex::new(store, client));
        let library = Library::from_data_dir(&data_dir).unwrap();
        Self {
            tmp,
            embedder,
            extractor: Arc::new(FakeExtractor::default()),
            index,
            library,
        }
    }

    pub fn uploads(&self) -> PathBuf {
        self.tmp.path().join("uploads")
    }

    pub fn resolver(&self) -> ContentResolver {
        ContentResolver::new(self.extractor.clone())
    }

    /// Save the outline and index it.
    pub async fn add(&self, doc: &OutlineDocument) -> usize {
        self.library.save_outline(&doc.doc_name, doc).unwrap();
        self.index.add_document_outline(doc).await.unwrap()
    }
}
