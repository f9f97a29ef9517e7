//! Raw C ABI shared between the Oriel engine and its Rust bindings.
//!
//! Everything in this crate is a type declaration; behavior lives on the
//! engine side of the boundary. An embedder hands the bindings an
//! [`EngineApi`] table of entry points at session wrap time, and the engine
//! drives the bindings back through the [`ClauseEventFn`] it received at
//! registration. No symbols are linked: the table is the contract.

use std::os::raw::{c_char, c_uint, c_void};

/// Revision of the callback ABI described by this crate.
///
/// Checked against [`EngineApi::abi_version`] when a session is wrapped.
pub const ABI_VERSION: u32 = 1;

/// Opaque engine-side solving session.
#[repr(C)]
pub struct RawSession {
    _opaque: [u8; 0],
}

/// Opaque engine-side term handle.
#[repr(C)]
pub struct RawTerm {
    _opaque: [u8; 0],
}

/// Opaque engine-side collection of literal terms.
#[repr(C)]
pub struct RawTermVec {
    _opaque: [u8; 0],
}

/// Identifier of one live clause-callback registration.
///
/// Zero is reserved: the engine returns it when registration fails, and the
/// bindings store it to mean "torn down".
pub type RegistrationId = u64;

/// Clause-inference event callback.
///
/// The engine invokes this once per inferred clause, synchronously on the
/// solving thread. `user` is the opaque pointer supplied at registration.
/// `derivation` is null when the engine produced no justification for the
/// inference. `deps` points at `num_deps` dependency indices and may be null
/// when `num_deps` is zero. `literals` is a valid collection handle for the
/// duration of the call. Every handle passed here is invalidated when the
/// callback returns.
pub type ClauseEventFn = unsafe extern "C" fn(
    user: *mut c_void,
    derivation: *mut RawTerm,
    num_deps: c_uint,
    deps: *const c_uint,
    literals: *mut RawTermVec,
);

/// Entry points the engine exposes to the bindings.
///
/// All functions take the owning session as their first argument. Handles
/// are only valid against the session that produced them.
#[repr(C)]
pub struct EngineApi {
    /// ABI revision the engine was built against; must equal [`ABI_VERSION`].
    pub abi_version: u32,

    /// Registers `callback` for clause inferences on `session`.
    ///
    /// Returns the nonzero registration id, or zero if the session cannot
    /// accept registrations (for instance because it is already finalized).
    pub register_on_clause: unsafe extern "C" fn(
        session: *mut RawSession,
        user: *mut c_void,
        callback: ClauseEventFn,
    ) -> RegistrationId,

    /// Releases a registration previously returned by `register_on_clause`.
    /// Unknown or already-released ids are ignored.
    pub unregister_on_clause:
        unsafe extern "C" fn(session: *mut RawSession, registration: RegistrationId),

    /// Deep-copies a term so it survives the current callback.
    ///
    /// Returns null if `term` is not a live handle of `session`.
    pub term_dup:
        unsafe extern "C" fn(session: *mut RawSession, term: *mut RawTerm) -> *mut RawTerm,

    /// Releases a duplicate produced by `term_dup`.
    pub term_release: unsafe extern "C" fn(session: *mut RawSession, term: *mut RawTerm),

    /// Renders a term in the engine's surface syntax.
    ///
    /// The returned string is engine-owned and valid only until the next
    /// call into the same session; copy it before calling back in.
    pub term_text:
        unsafe extern "C" fn(session: *mut RawSession, term: *mut RawTerm) -> *const c_char,

    /// Number of literals in a collection.
    pub term_vec_len:
        unsafe extern "C" fn(session: *mut RawSession, vec: *mut RawTermVec) -> c_uint,

    /// Borrows the literal at `index`; null when out of bounds.
    ///
    /// The returned handle shares the collection's lifetime.
    pub term_vec_get: unsafe extern "C" fn(
        session: *mut RawSession,
        vec: *mut RawTermVec,
        index: c_uint,
    ) -> *mut RawTerm,
}
