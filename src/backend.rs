use crate::config::NluConfig;
use crate::engine::InferenceEngine;
use crate::error::{AgiNluError, Result};
use crate::models::{ChatMessage, ChatRequest};
use crate::sampling::{SamplerKind, SamplerSet};
use crate::session::SlotPool;
use crate::transport::Transport;

/// Which lane a completion runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneChoice {
    /// Next lane in rotation; cleared before use.
    Rotating,
    /// The fixed language-detection lane; cleared before and after use so
    /// detection neither pollutes nor inherits other exchanges.
    Reserved,
}

/// One prompt-to-text completion, the single call shape the pipeline drives
/// regardless of backend variant.
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub lane: LaneChoice,
    pub sampler: SamplerKind,
    pub max_tokens: usize,
    pub stop_on_newline: bool,
}

/// Backend adapter. Sealed by construction: the two variants are the only
/// implementations and callers dispatch through this enum.
pub enum Backend {
    Local(LocalBackend),
    Remote(RemoteBackend),
}

impl Backend {
    pub fn complete(&mut self, req: &CompletionRequest<'_>) -> Result<String> {
        match self {
            Backend::Local(local) => local.complete(req),
            Backend::Remote(remote) => remote.complete(req),
        }
    }
}

/// Drives a local engine: clear lane, tokenize, feed the prompt in batches,
/// then sample token by token.
pub struct LocalBackend {
    engine: Box<dyn InferenceEngine>,
    pool: SlotPool,
    samplers: SamplerSet,
    batch_size: usize,
}

impl LocalBackend {
    pub fn new(engine: Box<dyn InferenceEngine>, config: &NluConfig) -> Self {
        let pool = SlotPool::new(config.n_seq_max);
        tracing::info!(
            "local backend ready: {} rotating lanes + detection lane, batch {}",
            pool.lane_count() - 1,
            config.batch_size
        );
        Self {
            engine,
            pool,
            samplers: SamplerSet::from_config(config),
            batch_size: config.batch_size.max(1),
        }
    }

    /// How many sequence lanes the engine must provision for this backend.
    pub fn required_lanes(&self) -> usize {
        self.pool.lane_count()
    }

    fn complete(&mut self, req: &CompletionRequest<'_>) -> Result<String> {
        let slot = match req.lane {
            LaneChoice::Rotating => self.pool.acquire(),
            LaneChoice::Reserved => self.pool.reserved(),
        };
        tracing::debug!("completion on lane {}", slot.index());

        // Cache isolation hinges on this clear: without it the lane still
        // holds a previous exchange.
        self.engine.clear_slot(slot)?;

        let result = self.run(slot, req);

        if req.lane == LaneChoice::Reserved {
            // Leave the detection lane empty for whoever is next, even if
            // this call failed partway.
            if let Err(e) = self.engine.clear_slot(slot) {
                tracing::warn!("failed to clear detection lane after use: {e}");
            }
        }

        result
    }

    fn run(
        &mut self,
        slot: crate::session::SlotId,
        req: &CompletionRequest<'_>,
    ) -> Result<String> {
        let tokens = self.engine.tokenize(req.prompt)?;
        if tokens.is_empty() {
            return Err(AgiNluError::Engine("prompt tokenized to nothing".to_string()));
        }
        if tokens.len() >= self.engine.context_size() {
            return Err(AgiNluError::Engine(format!(
                "prompt of {} tokens does not fit engine context of {}",
                tokens.len(),
                self.engine.context_size()
            )));
        }

        // Feed the prompt. Positions start at 0 for this lane (it was just
        // cleared); only the final position needs logits.
        let mut position = 0u32;
        for chunk in tokens.chunks(self.batch_size) {
            let is_last = position as usize + chunk.len() == tokens.len();
            self.engine.evaluate(slot, chunk, position, is_last)?;
            position += chunk.len() as u32;
        }

        let params = *self.samplers.get(req.sampler);
        let mut out: Vec<u8> = Vec::new();
        let mut generated = 0usize;

        while generated < req.max_tokens {
            let token = self.engine.sample(slot, &params)?;
            if self.engine.is_end_of_generation(token) {
                break;
            }

            let piece = self.engine.token_text(token);
            let hit_newline = piece.contains(&b'\n');
            out.extend_from_slice(&piece);

            self.engine
                .evaluate(slot, &[token], tokens.len() as u32 + generated as u32, true)?;
            generated += 1;

            if req.stop_on_newline && hit_newline {
                break;
            }
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// Remote variant: the whole tokenize/run/sample shape collapses into one
/// chat-completion POST. Lanes are meaningless here - every call is
/// stateless on the wire - so the lane choice is ignored.
pub struct RemoteBackend {
    transport: Box<dyn Transport>,
    model: String,
    samplers: SamplerSet,
}

impl RemoteBackend {
    pub fn new(transport: Box<dyn Transport>, config: &NluConfig) -> Self {
        tracing::info!("cloud backend ready: model {}", config.model_path);
        Self {
            transport,
            model: config.model_path.clone(),
            samplers: SamplerSet::from_config(config),
        }
    }

    fn complete(&mut self, req: &CompletionRequest<'_>) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(req.prompt)],
            temperature: self.samplers.get(req.sampler).temperature,
            max_tokens: req.max_tokens as i32,
        };

        let response = self.transport.chat(&request)?;
        response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| AgiNluError::Protocol("chat response had no choices".to_string()))
    }
}
