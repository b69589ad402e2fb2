//! ZTG Inline Inspection Engine
//!
//! Deep packet inspection for decrypted tunnel traffic:
//!
//! - **Signature loader**: line-oriented `id:pattern` config, literal or hex
//! - **Pattern automaton**: immutable multi-pattern matcher, built once and
//!   shared lock-free across connections
//! - **Verdict server**: length-prefixed local socket protocol answering
//!   drop/accept queries with a JSON verdict
//!
//! Signature reloads build a fresh automaton and swap it in atomically;
//! in-flight queries keep the automaton they started with.

pub mod automaton;
pub mod engine;
pub mod packet;
pub mod server;
pub mod signatures;

pub use automaton::{PatternAutomaton, SigMatch};
pub use engine::{DpiEngine, EngineStats, MatchDetail, Verdict, VerdictKind};
pub use packet::PacketMeta;
pub use server::VerdictServer;
pub use signatures::{load_signature_file, load_signatures, LoadStats, Signature};

use thiserror::Error;

/// DPI engine errors
#[derive(Debug, Error)]
pub enum DpiError {
    /// Signature source could not be read
    #[error("signature config error: {0}")]
    Config(String),

    /// Malformed request frame on the verdict socket
    #[error("socket protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DpiError>;
