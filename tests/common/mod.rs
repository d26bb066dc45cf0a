//! Shared test fixtures: in-memory store plus mock blob/model adapters.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use galaxy_ingest::blob::{BlobError, BlobStore};
use galaxy_ingest::config::{
    BlobConfig, Config, DbConfig, MappingConfig, ModelConfig, PipelineConfig,
};
use galaxy_ingest::ingest::PipelineContext;
use galaxy_ingest::model::{ModelClient, ModelError, RemoteRef};
use galaxy_ingest::store::RecordStore;
use galaxy_ingest::{db, migrate};

/// Config tuned for tests: millisecond backoff, no settling delay.
pub fn test_config() -> Config {
    let mut model = ModelConfig::default();
    model.initial_delay_ms = 1;
    model.max_delay_ms = 4;
    model.settling_delay_secs = 0;

    Config {
        db: DbConfig {
            path: PathBuf::from(":memory:"),
        },
        blob: BlobConfig {
            bucket: "test-bucket".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            path_style: false,
        },
        model,
        pipeline: PipelineConfig {
            max_concurrent: 2,
            deadline_secs: 30,
        },
        mapping: MappingConfig::default(),
    }
}

pub async fn memory_store() -> RecordStore {
    let pool = db::connect_memory().await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    RecordStore::new(pool)
}

pub async fn test_context(blob: Arc<MockBlob>, model: Arc<MockModel>) -> PipelineContext {
    PipelineContext {
        config: test_config(),
        store: memory_store().await,
        blob,
        model,
    }
}

// ============ Mock blob store ============

#[derive(Default)]
pub struct MockBlob {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub get_calls: AtomicUsize,
}

impl MockBlob {
    pub fn with_object(key: &str, bytes: &[u8]) -> Arc<Self> {
        let blob = Self::default();
        blob.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Arc::new(blob)
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BlobStore for MockBlob {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String, BlobError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok("mock-etag".to_string())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn signed_url(
        &self,
        key: &str,
        _ttl: Duration,
        _disposition: Option<&str>,
    ) -> Result<String, BlobError> {
        Ok(format!("https://blob.test/{key}?signed"))
    }
}

// ============ Mock model adapter ============

/// Scripted answer for one extraction target.
pub enum Scripted {
    Text(String),
    /// Every call for this target fails transiently (retries included).
    Transient,
}

/// Prompt-dispatching mock: each agent prompt carries a distinctive role
/// line, which selects the scripted answer.
pub struct MockModel {
    pub transcript: String,
    pub metadata: String,
    pub selection: String,
    pub judge: Mutex<String>,
    /// Per-framework extraction answers, keyed by framework name.
    pub extractions: Mutex<HashMap<String, Scripted>>,
    pub default_extraction: String,
    /// Remaining transient failures injected into the transcription stage.
    pub transcribe_failures: AtomicUsize,
    pub embed_fails: bool,

    pub upload_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub transcribe_calls: AtomicUsize,
    pub judge_calls: AtomicUsize,
    pub embed_calls: AtomicUsize,
    pub embed_inputs: Mutex<Vec<String>>,
    pub uploaded: Mutex<VecDeque<(String, String)>>,
}

impl Default for MockModel {
    fn default() -> Self {
        Self {
            transcript: "# Mock Document\n\nQuarterly strategy notes.".to_string(),
            metadata: serde_json::json!({
                "title": "Mock Document",
                "summary": "Quarterly strategy notes.",
                "tags": ["strategy", "q3"],
                "topics": ["planning"],
                "document_type": "Report",
                "category_suggestion": "Report"
            })
            .to_string(),
            selection: r#"{"selected_frameworks": []}"#.to_string(),
            judge: Mutex::new(r#"{"action": "CREATE", "reasoning": "no match"}"#.to_string()),
            extractions: Mutex::new(HashMap::new()),
            default_extraction: serde_json::json!({
                "title": "Mock Analysis",
                "summary": "Extracted findings.",
                "data": {},
                "completeness": 0.7,
                "confidence": 0.9
            })
            .to_string(),
            transcribe_failures: AtomicUsize::new(0),
            embed_fails: false,
            upload_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            transcribe_calls: AtomicUsize::new(0),
            judge_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
            embed_inputs: Mutex::new(Vec::new()),
            uploaded: Mutex::new(VecDeque::new()),
        }
    }
}

fn transient() -> ModelError {
    ModelError::Transient {
        status: 503,
        message: "mock overload".to_string(),
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn upload_file(
        &self,
        _bytes: &[u8],
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteRef, ModelError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.uploaded
            .lock()
            .unwrap()
            .push_back((display_name.to_string(), mime_type.to_string()));
        Ok(RemoteRef::new("https://model.test/v1beta/files/mock-1"))
    }

    async fn delete_file(&self, _remote: &RemoteRef) -> Result<(), ModelError> {
        Ok(())
    }

    async fn generate_text(
        &self,
        prompt: &str,
        _file: Option<(&RemoteRef, &str)>,
    ) -> Result<String, ModelError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);

        if prompt.contains("Librarian Agent") {
            self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.transcribe_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transcribe_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(transient());
            }
            return Ok(self.transcript.clone());
        }
        if prompt.contains("Knowledge Architect") {
            return Ok(self.metadata.clone());
        }
        if prompt.contains("Strategic Analyst") {
            return Ok(self.selection.clone());
        }
        if prompt.contains("specialized Analyst") {
            let extractions = self.extractions.lock().unwrap();
            for (name, scripted) in extractions.iter() {
                if prompt.contains(name.as_str()) {
                    return match scripted {
                        Scripted::Text(text) => Ok(text.clone()),
                        Scripted::Transient => Err(transient()),
                    };
                }
            }
            return Ok(self.default_extraction.clone());
        }
        if prompt.contains("Knowledge Curator") {
            self.judge_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(self.judge.lock().unwrap().clone());
        }
        Err(ModelError::InvalidResponse(format!(
            "mock received an unexpected prompt: {}",
            prompt.chars().take(80).collect::<String>()
        )))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.embed_inputs.lock().unwrap().push(text.to_string());
        if self.embed_fails {
            return Err(transient());
        }
        Ok(vec![0.25; 8])
    }
}
