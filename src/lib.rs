pub mod backend;
pub mod config;
pub mod dictionary;
pub mod engine;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod sampling;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Arc, Mutex};

use crate::backend::{Backend, LocalBackend, RemoteBackend};
use crate::dictionary::Dictionary;
use crate::pipeline::Pipeline;
use crate::transport::HttpTransport;

pub use crate::config::{BackendKind, NluConfig, NluMode};
pub use crate::engine::{EngineLoader, InferenceEngine, Token};
pub use crate::error::{AgiNluError, Result};

/// Supplies the rolling game/conversation context the generation prompt may
/// embed. Implemented by the interpreter; the session only ever reads it.
pub trait ContextSource: Send {
    fn context_string(&self) -> String;
}

/// Minimum dictionary size: the 26-entry offset table.
const DICTIONARY_HEADER_LEN: usize = 52;

/// The NLU session the interpreter owns: one backend, one dictionary view,
/// one language cache, all behind a single lock.
///
/// Concurrency policy: every public call takes the session lock for its
/// whole acquire-clear-run-sample sequence. Overlapping callers therefore
/// serialize in front of the engine - slot rotation isolates their cache
/// state, the lock isolates their execution. `NluSession` is `Send + Sync`.
///
/// Nothing here panics or returns an error to the interpreter: failed calls
/// degrade to each mode's neutral value (echoed input, "no match", empty
/// text) so gameplay continues with the interpreter's own parser.
pub struct NluSession {
    inner: Mutex<Inner>,
}

struct Inner {
    loader: Option<EngineLoader>,
    pipeline: Option<Pipeline>,
    mode: NluMode,
    dictionary_bytes: Option<Arc<[u8]>>,
    context: Option<Box<dyn ContextSource>>,
}

impl Default for NluSession {
    fn default() -> Self {
        Self::new()
    }
}

impl NluSession {
    /// A session that can only drive the cloud backend. Local backends need
    /// an engine loader - see [`NluSession::with_engine_loader`].
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                loader: None,
                pipeline: None,
                mode: NluMode::default(),
                dictionary_bytes: None,
                context: None,
            }),
        }
    }

    /// A session that obtains its local inference engine through `loader`
    /// (called once per `init` with the model target and resolved config).
    pub fn with_engine_loader(loader: EngineLoader) -> Self {
        let session = Self::new();
        session.inner.lock().unwrap().loader = Some(loader);
        session
    }

    /// Bring up the configured backend. `target` overrides the model path
    /// (local) or endpoint URL (cloud) when non-empty. Returns `false` on
    /// failure, after which every call is a no-op returning its neutral
    /// value.
    pub fn init(&self, target: &str, config: &NluConfig) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.pipeline.is_some() {
            tracing::warn!("init called on an already-initialized session");
            return true;
        }

        match build_pipeline(&inner, target, config) {
            Ok(pipeline) => {
                inner.pipeline = Some(pipeline);
                inner.mode = config.mode;
                tracing::info!(
                    "NLU session initialized: {:?} backend, {:?} mode",
                    config.backend,
                    config.mode
                );
                if config.verbose {
                    tracing::info!("resolved config: {config:?}");
                }
                true
            }
            Err(e) => {
                tracing::error!("NLU init failed: {e}");
                false
            }
        }
    }

    /// Tear the backend down. The session can be re-initialized afterwards;
    /// the installed dictionary and context source are kept.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.pipeline.take().is_some() {
            tracing::info!("NLU session shut down");
        }
    }

    pub fn ready(&self) -> bool {
        self.inner.lock().unwrap().pipeline.is_some()
    }

    /// Install the interpreter's compressed word table. Returns `false` if
    /// the buffer cannot even hold the offset table.
    pub fn set_dictionary(&self, data: impl Into<Arc<[u8]>>) -> bool {
        let data: Arc<[u8]> = data.into();
        if data.len() < DICTIONARY_HEADER_LEN {
            tracing::error!(
                "rejecting dictionary of {} bytes (offset table alone needs {})",
                data.len(),
                DICTIONARY_HEADER_LEN
            );
            return false;
        }

        let mut inner = self.inner.lock().unwrap();
        tracing::info!("dictionary installed ({} bytes)", data.len());
        if let Some(pipeline) = inner.pipeline.as_mut() {
            pipeline.set_dictionary(Dictionary::new(Arc::clone(&data)));
        }
        inner.dictionary_bytes = Some(data);
        true
    }

    /// Install the context source consulted during response generation.
    pub fn set_context_source(&self, source: Box<dyn ContextSource>) {
        self.inner.lock().unwrap().context = Some(source);
    }

    /// Extraction mode entry point. Never fails destructively: on any
    /// problem the original input comes back unchanged for the
    /// interpreter's own parser to chew on.
    pub fn extract_words(&self, input: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        if inner.mode == NluMode::Disabled {
            return input.to_string();
        }
        let Some(pipeline) = inner.pipeline.as_mut() else {
            tracing::debug!("extract_words before init, echoing input");
            return input.to_string();
        };

        match pipeline.extract_words(input) {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::warn!("extraction failed ({e}), echoing input");
                input.to_string()
            }
        }
    }

    /// Semantic-match mode entry point. Anything short of a confident
    /// "yes" - including every failure path - is reported as no match.
    pub fn matches_expected(&self, input: &str, expected_word_ids: &[u16]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.mode == NluMode::Disabled {
            return false;
        }
        let Some(pipeline) = inner.pipeline.as_mut() else {
            tracing::debug!("matches_expected before init");
            return false;
        };

        match pipeline.matches_expected(input, expected_word_ids) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!("semantic match failed ({e}), reporting no match");
                false
            }
        }
    }

    /// Response-generation entry point. Empty output means "use the game
    /// text as-is"; the interpreter already has it.
    pub fn generate_response(&self, game_text: &str, user_text: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;

        let context = inner.context.as_ref().map(|c| c.context_string());
        let Some(pipeline) = inner.pipeline.as_mut() else {
            tracing::debug!("generate_response before init");
            return String::new();
        };

        match pipeline.generate_response(game_text, user_text, context) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("response generation failed ({e})");
                String::new()
            }
        }
    }
}

fn build_pipeline(inner: &Inner, target: &str, config: &NluConfig) -> Result<Pipeline> {
    let mut config = config.clone();

    let backend = match config.backend {
        BackendKind::Cloud => {
            if !target.is_empty() {
                config.api_endpoint = target.to_string();
            }
            if config.api_key.is_empty() {
                return Err(AgiNluError::Config(
                    "cloud backend requires an API key".to_string(),
                ));
            }
            let transport =
                HttpTransport::new(config.api_endpoint.clone(), config.api_key.clone())?;
            Backend::Remote(RemoteBackend::new(Box::new(transport), &config))
        }
        BackendKind::LlamaCpp | BackendKind::BitNet => {
            if !target.is_empty() {
                config.model_path = target.to_string();
            }
            if config.model_path.is_empty() {
                return Err(AgiNluError::Config(
                    "local backend requires a model path".to_string(),
                ));
            }
            let loader = inner.loader.as_ref().ok_or_else(|| {
                AgiNluError::Config("no engine loader installed for local backend".to_string())
            })?;
            let engine = loader(&config.model_path, &config)?;
            Backend::Local(LocalBackend::new(engine, &config))
        }
    };

    let dictionary = inner
        .dictionary_bytes
        .as_ref()
        .map(|bytes| Dictionary::new(Arc::clone(bytes)));

    Ok(Pipeline::new(backend, &config, dictionary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEngine, SharedLog, build_dictionary};
    use std::sync::atomic::AtomicBool;

    fn mock_session(responses: Vec<&'static str>) -> (NluSession, SharedLog) {
        let log = SharedLog::default();
        let loader_log = log.clone();
        let session = NluSession::with_engine_loader(Box::new(move |_, _| {
            Ok(Box::new(MockEngine::new(
                responses.clone(),
                loader_log.clone(),
            )))
        }));
        (session, log)
    }

    fn init_local(session: &NluSession) -> bool {
        session.init("model.gguf", &NluConfig::default())
    }

    #[test]
    fn test_calls_before_init_return_neutral_values() {
        let session = NluSession::new();
        assert!(!session.ready());
        assert_eq!(session.extract_words("mira el castillo"), "mira el castillo");
        assert!(!session.matches_expected("mira", &[5]));
        assert_eq!(session.generate_response("You see a castle.", "mira"), "");
    }

    #[test]
    fn test_init_and_shutdown_lifecycle() {
        let (session, _log) = mock_session(vec!["go north"]);
        assert!(!session.ready());
        assert!(init_local(&session));
        assert!(session.ready());
        // Double init is tolerated.
        assert!(init_local(&session));

        session.shutdown();
        assert!(!session.ready());
        assert_eq!(session.extract_words("mira"), "mira");
    }

    #[test]
    fn test_local_init_requires_loader() {
        let session = NluSession::new();
        assert!(!session.init("model.gguf", &NluConfig::default()));
        assert!(!session.ready());
    }

    #[test]
    fn test_local_init_requires_model_path() {
        let (session, _log) = mock_session(vec![]);
        assert!(!session.init("", &NluConfig::default()));
    }

    #[test]
    fn test_cloud_init_requires_api_key() {
        let session = NluSession::new();
        let config = NluConfig {
            backend: BackendKind::Cloud,
            model_path: "gpt-test".to_string(),
            ..NluConfig::default()
        };
        assert!(!session.init("https://api.example.com/v1/chat/completions", &config));
        assert!(!session.ready());
    }

    #[test]
    fn test_extraction_through_session() {
        let (session, _log) = mock_session(vec![" Go North\n"]);
        assert!(init_local(&session));
        assert_eq!(session.extract_words("ve al norte"), "go north");
    }

    #[test]
    fn test_disabled_mode_is_a_no_op() {
        let (session, log) = mock_session(vec!["unused"]);
        let config = NluConfig {
            mode: NluMode::Disabled,
            ..NluConfig::default()
        };
        assert!(session.init("model.gguf", &config));
        assert_eq!(session.extract_words("mira"), "mira");
        assert!(!session.matches_expected("mira", &[5]));
        assert!(log.prompts().is_empty());
    }

    #[test]
    fn test_dictionary_survives_reinit_and_feeds_matching() {
        let (session, _log) = mock_session(vec!["yes"]);
        let dict = build_dictionary(&[('l', vec![(0, "look", 5)])]);
        assert!(session.set_dictionary(dict));

        assert!(init_local(&session));
        assert!(session.matches_expected("mira", &[5]));
    }

    #[test]
    fn test_undersized_dictionary_rejected() {
        let (session, _log) = mock_session(vec![]);
        assert!(!session.set_dictionary(vec![0u8; 10]));
    }

    #[test]
    fn test_engine_failure_degrades_and_does_not_poison() {
        let log = SharedLog::default();
        let loader_log = log.clone();
        let session = NluSession::with_engine_loader(Box::new(move |_, _| {
            Ok(Box::new(
                MockEngine::new(vec!["unused"], loader_log.clone()).failing_evaluate(),
            ))
        }));
        assert!(init_local(&session));

        // Engine errors never escape; every mode degrades to neutral.
        assert_eq!(session.extract_words("mira el castillo"), "mira el castillo");
        assert_eq!(session.generate_response("You see it.", ""), "");
        assert!(session.ready(), "one bad call must not kill the session");
    }

    struct FixedContext;

    impl ContextSource for FixedContext {
        fn context_string(&self) -> String {
            "Room 1: a small shed.".to_string()
        }
    }

    #[test]
    fn test_context_source_reaches_generation_prompt() {
        let (session, log) = mock_session(vec!["A shed."]);
        assert!(init_local(&session));
        session.set_context_source(Box::new(FixedContext));
        session.generate_response("You are in a shed.", "");
        assert!(log.prompts()[0].contains("Game context: Room 1: a small shed."));
    }

    #[test]
    fn test_overlapping_callers_are_serialized() {
        let guard = Arc::new(AtomicBool::new(false));
        let log = SharedLog::default();
        let loader_log = log.clone();
        let loader_guard = Arc::clone(&guard);
        let session = Arc::new(NluSession::with_engine_loader(Box::new(move |_, _| {
            Ok(Box::new(
                MockEngine::new(vec!["a"; 64], loader_log.clone())
                    .with_entry_guard(Arc::clone(&loader_guard)),
            ))
        })));
        assert!(init_local(&session));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || {
                    for _ in 0..4 {
                        session.extract_words("mira el castillo");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("no thread observed concurrent engine access");
        }
    }
}
