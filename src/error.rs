use std::{io, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("incomplete data at {address:#06x}: need {expected} words, got {actual}")]
    IncompleteData {
        address: u16,
        expected: usize,
        actual: usize,
    },
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("request at {address:#06x} timed out after {after:?}")]
    Timeout { address: u16, after: Duration },
    #[error("protocol error at {address:#06x}: {reason}")]
    Protocol { address: u16, reason: String },
    #[error("giving up after {failures} consecutive failed polls")]
    FatalExhaustion { failures: u32 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
