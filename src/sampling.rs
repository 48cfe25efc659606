use rand::Rng;

use crate::config::NluConfig;

/// Fixed seed for the deterministic sampler, so extraction and matching are
/// reproducible run to run.
const DETERMINISTIC_SEED: u32 = 42;

/// Floor for the creative temperature after jitter is applied.
const MIN_CREATIVE_TEMPERATURE: f32 = 0.05;

/// Parameters handed to the engine's sampler for one decode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerParams {
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub seed: u32,
}

/// Which of the two per-backend sampler configurations a call wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    /// Extraction, matching, language detection.
    Deterministic,
    /// Narrative response generation.
    Creative,
}

/// The two sampler configurations a backend carries for its lifetime.
///
/// The creative temperature and seed are drawn once here, at backend init:
/// repeated generations within one run vary, but the variation itself is
/// reproducible for that run rather than re-rolled per call.
#[derive(Debug, Clone)]
pub struct SamplerSet {
    deterministic: SamplerParams,
    creative: SamplerParams,
}

impl SamplerSet {
    pub fn from_config(config: &NluConfig) -> Self {
        let mut rng = rand::thread_rng();

        let offset = config.temperature_creative_offset;
        let jitter = if offset > 0.0 {
            rng.gen_range(-offset..=offset)
        } else {
            0.0
        };
        let creative_temperature =
            (config.temperature_creative_base + jitter).max(MIN_CREATIVE_TEMPERATURE);

        let set = Self {
            deterministic: SamplerParams {
                temperature: config.temperature,
                top_k: 1,
                top_p: 1.0,
                seed: DETERMINISTIC_SEED,
            },
            creative: SamplerParams {
                temperature: creative_temperature,
                top_k: config.top_k,
                top_p: config.top_p,
                seed: rng.r#gen(),
            },
        };

        tracing::debug!(
            "samplers ready: extraction temp {:.2}, creative temp {:.2}",
            set.deterministic.temperature,
            set.creative.temperature
        );
        set
    }

    pub fn get(&self, kind: SamplerKind) -> &SamplerParams {
        match kind {
            SamplerKind::Deterministic => &self.deterministic,
            SamplerKind::Creative => &self.creative,
        }
    }
}
