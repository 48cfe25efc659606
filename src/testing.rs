//! Test doubles shared by the backend, pipeline, and session tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{InferenceEngine, Token};
use crate::error::{AgiNluError, Result};
use crate::sampling::SamplerParams;
use crate::session::SlotId;

const EOG: Token = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Cleared(u32),
    Evaluated {
        slot: u32,
        n_tokens: usize,
        first_position: u32,
        logits_for_last: bool,
    },
    Sampled(u32),
}

impl MockEvent {
    fn slot(&self) -> u32 {
        match *self {
            MockEvent::Cleared(slot)
            | MockEvent::Evaluated { slot, .. }
            | MockEvent::Sampled(slot) => slot,
        }
    }
}

/// Handle onto the mock engine's event log; clone it before moving the
/// engine into a backend.
#[derive(Clone, Default)]
pub struct SharedLog {
    events: Arc<Mutex<Vec<MockEvent>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl SharedLog {
    fn push(&self, event: MockEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn push_prompt(&self, prompt: &str) {
        self.prompts.lock().unwrap().push(prompt.to_string());
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for_slot(&self, slot: u32) -> Vec<MockEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.slot() == slot)
            .collect()
    }

    /// Slots in the order they were cleared.
    pub fn cleared_slots(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Cleared(slot) => Some(slot),
                _ => None,
            })
            .collect()
    }

    /// Every prompt the engine was asked to tokenize, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

/// Scripted engine: each completion call plays back the next canned
/// response, one byte per token. Tokenization is also byte-per-token, which
/// keeps positions easy to assert on.
pub struct MockEngine {
    responses: VecDeque<String>,
    current: VecDeque<u8>,
    needs_reload: bool,
    context_size: usize,
    fail_evaluate: bool,
    entry_guard: Option<Arc<AtomicBool>>,
    log: SharedLog,
}

impl MockEngine {
    pub fn new(responses: Vec<&str>, log: SharedLog) -> Self {
        Self {
            responses: responses.into_iter().map(String::from).collect(),
            current: VecDeque::new(),
            needs_reload: true,
            context_size: 4096,
            fail_evaluate: false,
            entry_guard: None,
            log,
        }
    }

    pub fn with_context_size(mut self, context_size: usize) -> Self {
        self.context_size = context_size;
        self
    }

    pub fn failing_evaluate(mut self) -> Self {
        self.fail_evaluate = true;
        self
    }

    /// Flag that must never be observed set on entry: proves callers are
    /// serialized in front of the engine.
    pub fn with_entry_guard(mut self, guard: Arc<AtomicBool>) -> Self {
        self.entry_guard = Some(guard);
        self
    }

    fn check_exclusive(&self) {
        if let Some(guard) = &self.entry_guard {
            assert!(
                !guard.swap(true, Ordering::SeqCst),
                "engine entered concurrently"
            );
            std::thread::sleep(std::time::Duration::from_micros(200));
            guard.store(false, Ordering::SeqCst);
        }
    }
}

impl InferenceEngine for MockEngine {
    fn context_size(&self) -> usize {
        self.context_size
    }

    fn tokenize(&self, text: &str) -> Result<Vec<Token>> {
        self.log.push_prompt(text);
        Ok(text.bytes().map(Token::from).collect())
    }

    fn evaluate(
        &mut self,
        slot: SlotId,
        tokens: &[Token],
        first_position: u32,
        logits_for_last: bool,
    ) -> Result<()> {
        self.check_exclusive();
        self.log.push(MockEvent::Evaluated {
            slot: slot.index(),
            n_tokens: tokens.len(),
            first_position,
            logits_for_last,
        });
        if self.fail_evaluate {
            return Err(AgiNluError::Engine("mock evaluate failure".to_string()));
        }
        Ok(())
    }

    fn sample(&mut self, slot: SlotId, _params: &SamplerParams) -> Result<Token> {
        self.check_exclusive();
        self.log.push(MockEvent::Sampled(slot.index()));

        if self.needs_reload {
            self.current = self
                .responses
                .pop_front()
                .unwrap_or_default()
                .into_bytes()
                .into();
            self.needs_reload = false;
        }

        Ok(self.current.pop_front().map_or(EOG, Token::from))
    }

    fn token_text(&self, token: Token) -> Vec<u8> {
        vec![token as u8]
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        token < 0
    }

    fn clear_slot(&mut self, slot: SlotId) -> Result<()> {
        self.log.push(MockEvent::Cleared(slot.index()));
        // A cleared lane means a fresh exchange: next sample starts the
        // next scripted response.
        self.needs_reload = true;
        Ok(())
    }
}

/// Synthetic word-table builder for pipeline/session tests.
pub fn build_dictionary(chains: &[(char, Vec<(u8, &str, u16)>)]) -> Vec<u8> {
    let mut body: Vec<u8> = Vec::new();
    let mut offsets = [0u16; 26];

    for (letter, words) in chains {
        let idx = (*letter as u8 - b'a') as usize;
        offsets[idx] = (52 + body.len()) as u16;
        for (prefix, suffix, id) in words {
            body.push(*prefix);
            let bytes = suffix.as_bytes();
            for (i, &b) in bytes.iter().enumerate() {
                let mut enc = b ^ 0x7F;
                if i == bytes.len() - 1 {
                    enc |= 0x80;
                }
                body.push(enc);
            }
            body.extend_from_slice(&id.to_be_bytes());
        }
        body.push(0);
    }

    let mut data = Vec::with_capacity(52 + body.len());
    for off in offsets {
        data.extend_from_slice(&off.to_be_bytes());
    }
    data.extend_from_slice(&body);
    data
}
