use crate::config::NluConfig;
use crate::error::Result;
use crate::sampling::SamplerParams;
use crate::session::SlotId;

/// Token id in the engine's vocabulary.
pub type Token = i32;

/// The narrow surface this crate consumes from a local inference engine
/// (llama.cpp, BitNet, or anything shaped like them). Model loading and the
/// decode kernels live behind this trait, outside the crate.
///
/// Positions are per-lane: after `clear_slot`, the next `evaluate` for that
/// lane starts at position 0 and positions increase monotonically within
/// the call. Lanes are independent of each other.
pub trait InferenceEngine: Send {
    /// Maximum tokens the engine context holds.
    fn context_size(&self) -> usize;

    fn tokenize(&self, text: &str) -> Result<Vec<Token>>;

    /// Feed `tokens` into `slot` starting at `first_position`. When
    /// `logits_for_last` is set the engine must produce logits for the
    /// final token so the next `sample` call has something to read.
    fn evaluate(
        &mut self,
        slot: SlotId,
        tokens: &[Token],
        first_position: u32,
        logits_for_last: bool,
    ) -> Result<()>;

    fn sample(&mut self, slot: SlotId, params: &SamplerParams) -> Result<Token>;

    /// Raw bytes for a token. Byte-level, not char-level: a single UTF-8
    /// character may span tokens.
    fn token_text(&self, token: Token) -> Vec<u8>;

    fn is_end_of_generation(&self, token: Token) -> bool;

    /// Evict everything cached for `slot`. Must be called before a lane is
    /// reused; the local backend does this on every call.
    fn clear_slot(&mut self, slot: SlotId) -> Result<()>;
}

/// How the interpreter hands us a concrete local engine: called once per
/// `init` with the model target and the resolved config.
pub type EngineLoader =
    Box<dyn Fn(&str, &NluConfig) -> Result<Box<dyn InferenceEngine>> + Send>;
