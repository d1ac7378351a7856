//! Error types for multisig assembly

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultisigError {
    #[error("Invalid threshold: {threshold} of {keys} keys")]
    InvalidThreshold { threshold: usize, keys: usize },

    #[error("Too many keys for multisig: {0} (maximum 20)")]
    TooManyKeys(usize),

    #[error("Invalid script nesting: {0}")]
    InvalidNesting(String),

    #[error("Incomplete UTXO descriptor: {0}")]
    IncompleteUtxoDescriptor(String),

    #[error("Script mismatch: {0}")]
    ScriptMismatch(String),

    #[error("Negative output value: {0}")]
    NegativeValue(i64),

    #[error("Value {0} exceeds the maximum money supply")]
    ValueOutOfRange(i64),

    #[error("Input index {0} out of range")]
    InputOutOfRange(usize),

    #[error("Public key {0} is not part of the input's script")]
    KeyNotInScript(String),

    #[error("No signatures for public key {0}")]
    NoSignatureForKey(String),

    #[error("Input {input} has {found} valid signatures, {required} required")]
    InsufficientSignatures {
        input: usize,
        required: usize,
        found: usize,
    },

    #[error("Input {0} is not finalized")]
    NotFinalized(usize),

    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unsupported script: {0}")]
    UnsupportedScript(String),

    #[error("Outputs spend {outputs} but inputs only provide {inputs}")]
    OutputsExceedInputs { inputs: i64, outputs: i64 },

    #[error("Fee rate {rate} sat/vB exceeds maximum {max} sat/vB (fee {fee})")]
    FeeTooHigh { fee: i64, rate: u64, max: u64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MultisigError>;
