//! Rust bindings for the Oriel engine's clause-inference callback surface.
//!
//! The engine reports every clause it infers during search to whoever holds
//! a live registration. These bindings own the registration lifecycle
//! ([`ClauseSubscription`]), the boundary translation (a fixed `extern "C"`
//! trampoline the engine calls per event), and the safely-scoped views of
//! native event data handed to observers ([`Term`], [`TermVec`]).
//!
//! The engine itself stays on the far side of the C boundary: the bindings
//! reach it exclusively through the [`oriel_abi::EngineApi`] table wrapped by
//! [`Session`], and never initiate calls into it outside registration,
//! teardown, and the proxy accessors an observer uses during a callback.
//!
//! Event data is only valid inside the callback that delivered it. The view
//! types borrow the callback scope, so retaining anything requires an
//! explicit deep copy ([`Term::duplicate`]) before the handler returns.

pub mod error;
pub mod on_clause;
pub mod session;
pub mod term;

pub use error::BridgeError;
pub use on_clause::{handler_fn, ClauseHandler, ClauseSubscription};
pub use session::Session;
pub use term::{OwnedTerm, Term, TermVec};
