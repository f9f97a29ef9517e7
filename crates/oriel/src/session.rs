use std::ptr::NonNull;

use oriel_abi::{EngineApi, RawSession, ABI_VERSION};

use crate::error::BridgeError;

/// Borrowed view of an engine-owned solving session.
///
/// The engine creates, drives, and finalizes sessions; the bindings only
/// wrap the handle so registrations and proxies can reach the engine table.
/// Dropping a `Session` releases nothing.
pub struct Session {
    api: &'static EngineApi,
    raw: NonNull<RawSession>,
}

/// The (table, handle) pair a proxy or dispatch state carries to reach the
/// engine. Copied out of a [`Session`] because dispatch state outlives any
/// one borrow of it.
#[derive(Clone, Copy)]
pub(crate) struct SessionRef {
    pub(crate) api: &'static EngineApi,
    pub(crate) raw: NonNull<RawSession>,
}

// SAFETY: SessionRef is an opaque (table, handle) pair. The bindings never
// dereference the session pointer; every use hands it back to the engine,
// which serializes access on its side of the boundary. Dispatch state lives
// in a process-wide registry and must be able to cross threads with the
// engine's solving loop.
unsafe impl Send for SessionRef {}
unsafe impl Sync for SessionRef {}

impl Session {
    /// Wraps a raw engine session.
    ///
    /// Fails if `raw` is null or the engine table speaks a different ABI
    /// revision than these bindings were built against.
    ///
    /// # Safety
    ///
    /// `raw` must point at a live session owned by the engine behind `api`,
    /// and the session must stay live for as long as this wrapper, anything
    /// registered through it, and any [`OwnedTerm`](crate::OwnedTerm)
    /// duplicated from it are in use.
    pub unsafe fn from_raw(
        api: &'static EngineApi,
        raw: *mut RawSession,
    ) -> Result<Session, BridgeError> {
        if api.abi_version != ABI_VERSION {
            return Err(BridgeError::AbiVersion {
                engine: api.abi_version,
                expected: ABI_VERSION,
            });
        }
        let raw = NonNull::new(raw).ok_or(BridgeError::NullSession)?;
        log::debug!("wrapped engine session {:p} (abi v{})", raw, api.abi_version);
        Ok(Session { api, raw })
    }

    /// The engine entry-point table this session goes through.
    pub fn api(&self) -> &'static EngineApi {
        self.api
    }

    /// The underlying raw session handle.
    pub fn raw(&self) -> *mut RawSession {
        self.raw.as_ptr()
    }

    pub(crate) fn shared(&self) -> SessionRef {
        SessionRef {
            api: self.api,
            raw: self.raw,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("raw", &self.raw)
            .field("abi_version", &self.api.abi_version)
            .finish_non_exhaustive()
    }
}
