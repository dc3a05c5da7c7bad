//! Crate-wide error types.
//!
//! Only errors that cross an API boundary (malformed wire input, bridge I/O
//! setup) are represented here. Everything the FSM itself recovers from
//! (bad CRC, stale session_id, timeouts) is handled internally per §7 of the
//! spec and never surfaces as a `Result`.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer too short: need {need}, got {got}")]
    Short { need: usize, got: usize },
    #[error("CRC-6 mismatch")]
    BadCrc,
    #[error("malformed input")]
    BadInput,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed command line: {0:?}")]
    BadCommand(String),
}

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("failed to open audio backend: {0}")]
    OpenFailed(String),
    #[error("write to playback ring failed: {0}")]
    WriteFailed(String),
}
