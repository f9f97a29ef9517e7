use thiserror::Error;

/// Errors surfaced by the clause-callback bindings.
///
/// Only construction-time failures are represented. Dispatch-time problems
/// (a panicking handler, a stale dispatch key) are contained at the
/// trampoline and reported through `log` instead, because nothing useful can
/// be returned across the native call boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("engine refused the clause-callback registration (session finalized or out of resources)")]
    Registration,

    #[error("session handle is null")]
    NullSession,

    #[error("engine speaks callback ABI v{engine}, these bindings were built against v{expected}")]
    AbiVersion { engine: u32, expected: u32 },
}
