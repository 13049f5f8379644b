/// Text generation boundary — sampling configuration, backend trait, and
/// the client that turns every backend failure into a sentinel string.
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("text generation backend not available")]
    Unavailable,
    #[error("{0}")]
    Request(String),
    #[error("backend produced no output")]
    EmptyOutput,
    #[error("generation timed out after {0} ms")]
    Timeout(u64),
}

impl BackendError {
    /// The failure string stored in place of a reply.
    pub fn sentinel(&self) -> String {
        match self {
            Self::Unavailable => "[Error] Text generation backend not available.".to_string(),
            Self::EmptyOutput => "[Error] Local model produced no output.".to_string(),
            Self::Timeout(ms) => format!("[Error] Generation timed out after {ms} ms."),
            Self::Request(e) => format!("[Error during inference: {e}]"),
        }
    }
}

/// Sampling parameters passed to the backend with every prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub min_p: f32,
    pub repeat_penalty: f32,
    pub repeat_last_n: u32,
    pub batch_size: u32,
    pub max_tokens: u32,
    pub streaming_enabled: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            min_p: 0.0,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            batch_size: 128,
            max_tokens: 256,
            streaming_enabled: false,
        }
    }
}

impl GenerationConfig {
    /// Low-latency profile for short judgement calls.
    pub fn evaluator() -> Self {
        Self {
            max_tokens: 120,
            temperature: 0.35,
            top_p: 0.92,
            repeat_penalty: 1.1,
            batch_size: 4,
            ..Self::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sanity warnings for out-of-range values. Never rejects a config.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(0.0..=2.0).contains(&self.temperature) {
            warnings.push(format!(
                "temperature should be between 0 and 2, got {}",
                self.temperature
            ));
        }
        if self.max_tokens < 1 {
            warnings.push("max_tokens should be positive".to_string());
        }
        warnings
    }
}

/// A text-generation capability. Implementations block until the full
/// completion is available.
pub trait TextBackend: Send + Sync {
    fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, BackendError>;

    /// Short label used in log output.
    fn name(&self) -> &str {
        "backend"
    }
}

/// Never-failing front of a [`TextBackend`].
///
/// Missing backends, backend errors, empty output and timeouts come back
/// from [`GenerationClient::generate`] as an `[Error…` string. Callers that
/// must tell failures apart from model text use
/// [`GenerationClient::try_generate`].
#[derive(Clone, Default)]
pub struct GenerationClient {
    backend: Option<Arc<dyn TextBackend>>,
    timeout: Option<Duration>,
}

impl fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationClient")
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn TextBackend>) -> Self {
        Self {
            backend: Some(backend),
            timeout: None,
        }
    }

    /// A client with no backend; every call returns the unavailable sentinel.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Generate a completion, returning trimmed text or a failure sentinel.
    pub fn generate(&self, prompt: &str, config: &GenerationConfig) -> String {
        self.try_generate(prompt, config)
            .unwrap_or_else(|e| e.sentinel())
    }

    /// Generate a completion, keeping success and failure apart.
    ///
    /// Model text is returned as-is even when it happens to look like a
    /// sentinel. Failures are logged here.
    pub fn try_generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, BackendError> {
        self.call_backend(prompt, config).inspect_err(|e| {
            warn!(error = %e, "text generation failed");
        })
    }

    fn call_backend(&self, prompt: &str, config: &GenerationConfig) -> Result<String, BackendError> {
        let backend = self.backend.as_ref().ok_or(BackendError::Unavailable)?;
        let raw = match self.timeout {
            Some(timeout) => call_with_timeout(Arc::clone(backend), prompt, config, timeout)?,
            None => backend.generate(prompt, config)?,
        };

        let text = raw.trim();
        if text.is_empty() {
            let snippet: String = prompt.chars().take(120).collect();
            warn!(
                backend = backend.name(),
                prompt = %snippet.replace('\n', " "),
                "backend returned empty output"
            );
            return Err(BackendError::EmptyOutput);
        }
        debug!(backend = backend.name(), chars = text.len(), "generated text");
        Ok(text.to_string())
    }
}

/// Run the backend on a helper thread and give up after `timeout`.
/// The helper is left to finish on its own; its result is discarded.
fn call_with_timeout(
    backend: Arc<dyn TextBackend>,
    prompt: &str,
    config: &GenerationConfig,
    timeout: Duration,
) -> Result<String, BackendError> {
    let (tx, rx) = mpsc::channel();
    let prompt = prompt.to_string();
    let config = config.clone();
    std::thread::Builder::new()
        .name("generation".to_string())
        .spawn(move || {
            // The receiver may already be gone after a timeout
            let _ = tx.send(backend.generate(&prompt, &config));
        })
        .map_err(|e| BackendError::Request(e.to_string()))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            Err(BackendError::Timeout(timeout.as_millis() as u64))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(BackendError::Request(
            "generation worker exited without a result".to_string(),
        )),
    }
}

/// Offline backend that answers with one of a fixed set of replies,
/// chosen by a seeded RNG.
pub struct CannedBackend {
    replies: Vec<String>,
    rng: Mutex<StdRng>,
}

impl CannedBackend {
    pub fn new(replies: Vec<String>, seed: u64) -> Self {
        Self {
            replies,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl TextBackend for CannedBackend {
    fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String, BackendError> {
        let mut rng = self.rng.lock();
        self.replies
            .choose(&mut *rng)
            .cloned()
            .ok_or(BackendError::EmptyOutput)
    }

    fn name(&self) -> &str {
        "canned"
    }
}

/// Backend for llama.cpp-compatible servers exposing `POST /completion`.
#[cfg(feature = "http")]
pub struct HttpBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
}

#[cfg(feature = "http")]
#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    temperature: f32,
    top_k: u32,
    top_p: f32,
    min_p: f32,
    repeat_penalty: f32,
    repeat_last_n: u32,
    n_batch: u32,
    n_predict: u32,
    stream: bool,
}

#[cfg(feature = "http")]
#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
}

#[cfg(feature = "http")]
impl HttpBackend {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/completion", base_url.trim_end_matches('/')),
        })
    }
}

#[cfg(feature = "http")]
impl TextBackend for HttpBackend {
    fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, BackendError> {
        // Responses are read whole, so streaming is always off on the wire
        let request = CompletionRequest {
            prompt,
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            min_p: config.min_p,
            repeat_penalty: config.repeat_penalty,
            repeat_last_n: config.repeat_last_n,
            n_batch: config.batch_size,
            n_predict: config.max_tokens,
            stream: false,
        };
        let response: CompletionResponse = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(response.content)
    }

    fn name(&self) -> &str {
        "http"
    }
}
