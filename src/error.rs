use thiserror::Error;

/// Errors internal to the NLU layer. None of these cross the interpreter
/// boundary: the public `NluSession` methods catch them and degrade to each
/// mode's neutral value.
#[derive(Error, Debug)]
pub enum AgiNluError {
    #[error("backend not initialized")]
    NotReady,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("dictionary error: {0}")]
    Dictionary(#[from] DictionaryError),

    #[error("inference engine error: {0}")]
    Engine(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed backend response: {0}")]
    Protocol(String),
}

/// Decode errors for the compressed word table. The codec recovers from
/// these by skipping to the next letter chain, so they surface only in logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DictionaryError {
    #[error("offset table truncated: need {needed} bytes, have {len}")]
    TruncatedTable { needed: usize, len: usize },

    #[error("word record truncated at byte {offset}")]
    TruncatedRecord { offset: usize },
}

pub type Result<T> = std::result::Result<T, AgiNluError>;
