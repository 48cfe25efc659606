use crate::backend::{Backend, CompletionRequest, LaneChoice};
use crate::config::NluConfig;
use crate::dictionary::Dictionary;
use crate::error::Result;
use crate::sampling::SamplerKind;

/// Extraction only ever needs "verb noun".
const EXTRACT_TOKEN_CAP: usize = 10;

/// Adventure-game responses are a couple of sentences at most.
const RESPONSE_TOKEN_CAP: usize = 150;

/// A language name is a word or two.
const DETECT_TOKEN_CAP: usize = 15;

/// Marker the generation template seeds; models sometimes echo it back in
/// front of the actual text.
const RESPONSE_MARKER: &str = "Response:";

const DEFAULT_LANGUAGE: &str = "English";

/// Languages the detector recognizes by name. Anything else of plausible
/// length is passed through verbatim so players outside this list still get
/// answers in their own language.
const KNOWN_LANGUAGES: &[&str] = &[
    "English",
    "Spanish",
    "French",
    "German",
    "Italian",
    "Portuguese",
    "Russian",
    "Japanese",
    "Chinese",
];

/// The three NLU operating modes plus language detection, built on top of
/// one backend completion primitive. Holds the per-backend mutable state:
/// the dictionary view and the last detected player language.
pub struct Pipeline {
    backend: Backend,
    dictionary: Option<Dictionary>,
    detected_language: String,
    match_token_cap: usize,
}

impl Pipeline {
    pub fn new(backend: Backend, config: &NluConfig, dictionary: Option<Dictionary>) -> Self {
        Self {
            backend,
            dictionary,
            detected_language: DEFAULT_LANGUAGE.to_string(),
            match_token_cap: config.max_tokens,
        }
    }

    pub fn set_dictionary(&mut self, dictionary: Dictionary) {
        self.dictionary = Some(dictionary);
    }

    /// Extraction mode: rewrite free-form input into a short English
    /// "verb noun" phrase for the interpreter's own matcher.
    pub fn extract_words(&mut self, input: &str) -> Result<String> {
        if input.trim().is_empty() {
            return Ok(input.to_string());
        }

        let prompt = {
            let hint = self
                .dictionary
                .as_ref()
                .map(|d| d.hint())
                .filter(|h| !h.is_empty());
            match hint {
                Some(verbs) => extraction_prompt(verbs, input),
                None => simple_extraction_prompt(input),
            }
        };

        let raw = self.backend.complete(&CompletionRequest {
            prompt: &prompt,
            lane: LaneChoice::Rotating,
            sampler: SamplerKind::Deterministic,
            max_tokens: EXTRACT_TOKEN_CAP,
            stop_on_newline: true,
        })?;

        let extracted = normalize_extraction(&raw);
        tracing::debug!("extracted '{extracted}' from '{input}'");
        Ok(extracted)
    }

    /// Semantic-match mode: does the input mean the same thing as the
    /// command spelled by `expected_word_ids`? Ambiguity is never a match.
    pub fn matches_expected(&mut self, input: &str, expected_word_ids: &[u16]) -> Result<bool> {
        if expected_word_ids.is_empty() {
            return Ok(false);
        }
        let Some(dictionary) = self.dictionary.as_ref() else {
            tracing::debug!("no dictionary loaded, cannot match word ids");
            return Ok(false);
        };

        let words: Vec<String> = expected_word_ids
            .iter()
            .filter_map(|&id| dictionary.resolve(id))
            .collect();
        if words.is_empty() {
            return Ok(false);
        }
        let expected = words.join(" ");

        let prompt = semantic_prompt(&expected, input);
        let raw = self.backend.complete(&CompletionRequest {
            prompt: &prompt,
            lane: LaneChoice::Rotating,
            sampler: SamplerKind::Deterministic,
            max_tokens: self.match_token_cap,
            stop_on_newline: false,
        })?;

        let matched = classify_match(&raw);
        tracing::debug!("'{input}' vs '{expected}': {}", if matched { "match" } else { "no match" });
        Ok(matched)
    }

    /// Response-generation mode: retell the game's canonical English
    /// response in the player's language.
    pub fn generate_response(
        &mut self,
        game_text: &str,
        user_text: &str,
        context: Option<String>,
    ) -> Result<String> {
        if game_text.is_empty() {
            return Ok(String::new());
        }

        let language = if user_text.trim().is_empty() {
            self.detected_language.clone()
        } else {
            self.detect_language(user_text)
        };

        let context = context.filter(|c| !c.trim().is_empty());
        let prompt = generation_prompt(&language, game_text, context.as_deref());

        let raw = self.backend.complete(&CompletionRequest {
            prompt: &prompt,
            lane: LaneChoice::Rotating,
            sampler: SamplerKind::Creative,
            max_tokens: RESPONSE_TOKEN_CAP,
            stop_on_newline: false,
        })?;

        Ok(normalize_generation(&raw))
    }

    /// Identify the player's language from their raw input. Runs in the
    /// reserved lane (cleared before and after inside the backend) so it
    /// never shares cache state with ordinary exchanges. Engine trouble
    /// falls back to English without touching the cache.
    fn detect_language(&mut self, input: &str) -> String {
        let prompt = detection_prompt(input);
        let raw = match self.backend.complete(&CompletionRequest {
            prompt: &prompt,
            lane: LaneChoice::Reserved,
            sampler: SamplerKind::Deterministic,
            max_tokens: DETECT_TOKEN_CAP,
            stop_on_newline: true,
        }) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("language detection failed: {e}");
                return DEFAULT_LANGUAGE.to_string();
            }
        };

        let language = canonical_language(&raw);
        tracing::debug!("detected language '{language}'");
        self.detected_language = language.clone();
        language
    }
}

/// Trim and lowercase. Applying it twice changes nothing.
pub fn normalize_extraction(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Strict yes/no classification: only a response that starts with "yes"
/// (after lowercasing and left-trim) counts as a match. "no", empty, and
/// anything garbled all mean no.
pub fn classify_match(raw: &str) -> bool {
    raw.to_lowercase().trim_start().starts_with("yes")
}

/// Strip the echoed template marker if present, then shed whitespace and
/// wrapping quotes.
pub fn normalize_generation(raw: &str) -> String {
    let after_marker = match raw.find(RESPONSE_MARKER) {
        Some(i) => &raw[i + RESPONSE_MARKER.len()..],
        None => raw,
    };
    let trimmed = after_marker.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

/// Map a raw detector answer onto a usable language name.
pub fn canonical_language(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('.').trim_end();
    for &known in KNOWN_LANGUAGES {
        if trimmed.starts_with(known) {
            return known.to_string();
        }
    }
    if trimmed.len() > 2 && trimmed.len() < 32 {
        trimmed.to_string()
    } else {
        DEFAULT_LANGUAGE.to_string()
    }
}

fn extraction_prompt(verbs: &str, input: &str) -> String {
    format!(
        "<|user|>\n\
         Translate to English using these verbs: {verbs}\n\
         Input: mira el castillo<|end|>\n\
         <|assistant|>\n\
         look castle<|end|>\n\
         <|user|>\n\
         Translate to English using these verbs: {verbs}\n\
         Input: coge la llave<|end|>\n\
         <|assistant|>\n\
         get key<|end|>\n\
         <|user|>\n\
         Translate to English using these verbs: {verbs}\n\
         Input: {input}<|end|>\n\
         <|assistant|>\n"
    )
}

fn simple_extraction_prompt(input: &str) -> String {
    format!(
        "<|user|>\n\
         Translate to English (verb noun only):\n\
         mira el castillo<|end|>\n\
         <|assistant|>\n\
         look castle<|end|>\n\
         <|user|>\n\
         Translate to English (verb noun only):\n\
         coge la llave<|end|>\n\
         <|assistant|>\n\
         get key<|end|>\n\
         <|user|>\n\
         Translate to English (verb noun only):\n\
         {input}<|end|>\n\
         <|assistant|>\n"
    )
}

fn semantic_prompt(expected: &str, input: &str) -> String {
    format!(
        "<|system|>\n\
         You are a command matcher for a text adventure game. Your job is to determine \
         if a user's input (in any language) has the same meaning as a specific game \
         command (in English).\n\n\
         Rules:\n\
         - If the input means the same action as the expected command, answer 'yes'\n\
         - If the input means something different, answer 'no'\n\
         - Only answer with 'yes' or 'no', nothing else\n\
         <|end|>\n\
         <|user|>\n\
         Expected command: look castle\n\
         User input: mira el castillo\n\
         Does the input match the command?<|end|>\n\
         <|assistant|>\n\
         yes<|end|>\n\
         <|user|>\n\
         Expected command: get key\n\
         User input: coge la llave\n\
         Does the input match the command?<|end|>\n\
         <|assistant|>\n\
         yes<|end|>\n\
         <|user|>\n\
         Expected command: open door\n\
         User input: abrir puerta\n\
         Does the input match the command?<|end|>\n\
         <|assistant|>\n\
         yes<|end|>\n\
         <|user|>\n\
         Expected command: quit\n\
         User input: mira el castillo\n\
         Does the input match the command?<|end|>\n\
         <|assistant|>\n\
         no<|end|>\n\
         <|user|>\n\
         Expected command: fast\n\
         User input: mira el castillo\n\
         Does the input match the command?<|end|>\n\
         <|assistant|>\n\
         no<|end|>\n\
         <|user|>\n\
         Expected command: restore game\n\
         User input: mirar castillo\n\
         Does the input match the command?<|end|>\n\
         <|assistant|>\n\
         no<|end|>\n\
         <|user|>\n\
         Expected command: {expected}\n\
         User input: {input}\n\
         Does the input match the command?<|end|>\n\
         <|assistant|>\n"
    )
}

fn generation_prompt(language: &str, game_text: &str, context: Option<&str>) -> String {
    let context_block = match context {
        Some(ctx) => format!("Game context: {ctx}\n"),
        None => String::new(),
    };
    format!(
        "<|user|>\n\
         You are the narrator of a text adventure game. The player speaks {language}.\n\
         Game response (English): {game_text}\n\
         {context_block}\
         Retell the game response in {language}, keeping its meaning. Be brief, stay in \
         character, and output nothing but the response itself.\n\
         {RESPONSE_MARKER}<|end|>\n\
         <|assistant|>\n"
    )
}

fn detection_prompt(input: &str) -> String {
    format!(
        "<|user|>\n\
         What language is this phrase written in? Answer with the language name only.\n\
         Phrase: where am I<|end|>\n\
         <|assistant|>\n\
         English<|end|>\n\
         <|user|>\n\
         Phrase: mira el castillo<|end|>\n\
         <|assistant|>\n\
         Spanish<|end|>\n\
         <|user|>\n\
         Phrase: ouvre la porte<|end|>\n\
         <|assistant|>\n\
         French<|end|>\n\
         <|user|>\n\
         Phrase: {input}<|end|>\n\
         <|assistant|>\n"
    )
}
