use std::ops::ControlFlow;
use std::sync::{Arc, OnceLock};

use crate::error::DictionaryError;

/// 26 big-endian u16 offsets, one per leading letter a-z.
const OFFSET_TABLE_LEN: usize = 52;

/// Longest word the decoder will keep. Anything beyond this is truncated
/// and logged; the rest of the record is still consumed so the scan stays
/// aligned.
const MAX_WORD_LEN: usize = 63;

/// How many leading dictionary words go into the vocabulary hint. The first
/// words of an adventure-game word table are almost always its verbs.
pub const COMMON_WORD_LIMIT: usize = 50;

/// Read-only view over the interpreter's compressed word table.
///
/// Layout: a 26-entry offset table, then per-letter chains of
/// prefix-compressed records `{prefix_len, encoded chars (last byte has the
/// high bit set, each char stored XOR 0x7F), big-endian word id}`. A chain
/// ends with a zero prefix byte after at least one record.
pub struct Dictionary {
    data: Arc<[u8]>,
    hint: OnceLock<String>,
}

impl Dictionary {
    pub fn new(data: Arc<[u8]>) -> Self {
        Self {
            data,
            hint: OnceLock::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Look up the string for a word id. `None` when the id is absent or
    /// the table is unusable.
    pub fn resolve(&self, word_id: u16) -> Option<String> {
        let mut found = None;
        self.scan(|word, id| {
            if id == word_id {
                found = Some(word.to_string());
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        if found.is_none() {
            tracing::debug!("word id {word_id} not found in dictionary");
        }
        found
    }

    /// The first `limit` words of the table, comma-joined. Used only as a
    /// vocabulary hint inside prompts, never as ground truth.
    pub fn common_words(&self, limit: usize) -> String {
        let mut words = Vec::new();
        self.scan(|word, _| {
            if !word.is_empty() {
                words.push(word.to_string());
            }
            if words.len() >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        words.join(", ")
    }

    /// Memoized hint list at the default limit. Computed on first use;
    /// installing a new table means building a new `Dictionary`, so the
    /// cache can never go stale.
    pub(crate) fn hint(&self) -> &str {
        self.hint
            .get_or_init(|| self.common_words(COMMON_WORD_LIMIT))
    }

    /// Walk every decodable word in letter order. A malformed chain is
    /// logged and skipped; remaining letters are still visited.
    fn scan<F>(&self, mut visit: F)
    where
        F: FnMut(&str, u16) -> ControlFlow<()>,
    {
        if self.data.len() < OFFSET_TABLE_LEN {
            tracing::warn!(
                "dictionary too small for offset table ({} bytes)",
                self.data.len()
            );
            return;
        }

        for letter in 0..26 {
            let offset =
                u16::from_be_bytes([self.data[letter * 2], self.data[letter * 2 + 1]]) as usize;
            if offset == 0 {
                continue;
            }

            match self.scan_chain(offset, &mut visit) {
                Ok(ControlFlow::Break(())) => return,
                Ok(ControlFlow::Continue(())) => {}
                Err(e) => {
                    tracing::warn!(
                        "malformed dictionary chain for letter {}: {e}",
                        (b'a' + letter as u8) as char
                    );
                }
            }
        }
    }

    /// Decode one letter chain starting at `offset`.
    fn scan_chain<F>(
        &self,
        offset: usize,
        visit: &mut F,
    ) -> Result<ControlFlow<()>, DictionaryError>
    where
        F: FnMut(&str, u16) -> ControlFlow<()>,
    {
        let data = &self.data;
        let mut pos = offset;
        let mut prev = String::new();
        let mut records = 0usize;

        loop {
            let prefix = *data
                .get(pos)
                .ok_or(DictionaryError::TruncatedRecord { offset: pos })?
                as usize;
            if records > 0 && prefix == 0 {
                return Ok(ControlFlow::Continue(()));
            }
            pos += 1;
            records += 1;

            // Splice the shared prefix from the previous word in this chain.
            let keep = if prefix > prev.len() {
                tracing::warn!(
                    "dictionary prefix {prefix} longer than previous word ({}), clamping",
                    prev.len()
                );
                prev.len()
            } else {
                prefix
            };
            let mut word = prev.as_bytes()[..keep].to_vec();
            let mut truncated = false;

            loop {
                let byte = *data
                    .get(pos)
                    .ok_or(DictionaryError::TruncatedRecord { offset: pos })?;
                pos += 1;

                let ch = (byte & 0x7F) ^ 0x7F;
                if word.len() < MAX_WORD_LEN {
                    word.push(ch);
                } else {
                    truncated = true;
                }

                if byte & 0x80 != 0 {
                    break;
                }
            }

            if truncated {
                tracing::warn!("dictionary word longer than {MAX_WORD_LEN} bytes, truncated");
            }

            let id_bytes = data
                .get(pos..pos + 2)
                .ok_or(DictionaryError::TruncatedRecord { offset: pos })?;
            let id = u16::from_be_bytes([id_bytes[0], id_bytes[1]]);
            pos += 2;

            let word = String::from_utf8_lossy(&word).into_owned();
            if visit(&word, id).is_break() {
                return Ok(ControlFlow::Break(()));
            }
            prev = word;
        }
    }
}
