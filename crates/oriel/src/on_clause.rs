//! Clause-inference callback registration and dispatch.
//!
//! A [`ClauseSubscription`] owns one engine-side registration. The engine
//! delivers every inference to a fixed `extern "C"` trampoline registered
//! alongside an opaque dispatch key; the trampoline resolves the key,
//! translates the raw arguments into scoped views, and invokes the caller's
//! [`ClauseHandler`].
//!
//! Dispatch state lives in a process-wide slab registry and crosses the
//! boundary as an integer key disguised as the engine's `user` pointer.
//! Dispatch clones the state out of the registry before running the handler,
//! so tearing a subscription down on one thread never frees state under a
//! handler running on the solving thread. Whether the engine itself
//! tolerates unregistration during a live solve is engine-defined; unless it
//! says otherwise, stop solving before calling [`ClauseSubscription::close`].
//!
//! Handlers run on the engine's solving thread and should not panic: the
//! trampoline must return to the engine through the C calling convention, so
//! a panic is caught at the boundary, reported through `log::error!`, and
//! the event is lost. Report handler errors out-of-band instead.

use std::any::Any;
use std::os::raw::{c_uint, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::slice;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use slab::Slab;

use oriel_abi::{RawTerm, RawTermVec, RegistrationId};

use crate::error::BridgeError;
use crate::session::{Session, SessionRef};
use crate::term::{Term, TermVec};

/// Observer of clause inferences.
///
/// Implementations override [`on_clause`](ClauseHandler::on_clause); the
/// default is a no-op. Handlers must be `Send` because dispatch state lives
/// in a process-wide registry and the engine may solve on another thread.
pub trait ClauseHandler: Send {
    /// Called once per clause the engine chooses to report, in delivery
    /// order, never concurrently with itself for one subscription.
    ///
    /// `derivation` is the optional justification for the inference, `deps`
    /// the indices of the premises it depends on, `literals` the inferred
    /// clause. All three views die when this method returns; duplicate
    /// anything worth keeping.
    fn on_clause(&mut self, derivation: Option<Term<'_>>, deps: &[u32], literals: TermVec<'_>) {
        let _ = (derivation, deps, literals);
    }
}

/// Wraps a closure as a [`ClauseHandler`].
pub fn handler_fn<F>(f: F) -> impl ClauseHandler + 'static
where
    F: for<'cb> FnMut(Option<Term<'cb>>, &[u32], TermVec<'cb>) + Send + 'static,
{
    struct FnHandler<F>(F);

    impl<F> ClauseHandler for FnHandler<F>
    where
        F: for<'cb> FnMut(Option<Term<'cb>>, &[u32], TermVec<'cb>) + Send,
    {
        fn on_clause(&mut self, derivation: Option<Term<'_>>, deps: &[u32], literals: TermVec<'_>) {
            (self.0)(derivation, deps, literals)
        }
    }

    FnHandler(f)
}

/// State the trampoline needs per live subscription.
///
/// Shared between the registry and any in-flight dispatch, so teardown can
/// drop the registry entry without pulling the state out from under a
/// running handler.
struct DispatchState {
    session: SessionRef,
    handler: Mutex<Box<dyn ClauseHandler>>,
}

/// Live dispatch states, keyed by the integer smuggled through the engine's
/// opaque user pointer.
static REGISTRY: Lazy<Mutex<Slab<Arc<DispatchState>>>> =
    Lazy::new(|| Mutex::new(Slab::new()));

// Keys are offset by one so the pointer handed to the engine is never null.
fn key_to_user(key: usize) -> *mut c_void {
    (key + 1) as *mut c_void
}

fn user_to_key(user: *mut c_void) -> Option<usize> {
    (user as usize).checked_sub(1)
}

/// Live registration of a [`ClauseHandler`] against a session's clause
/// inferences.
///
/// Holds the nonzero engine-side registration handle until
/// [`close`](ClauseSubscription::close) releases it; the handle is written
/// exactly twice in its lifetime (set here, cleared at teardown) and only
/// read in between. Dropping the subscription closes it as well.
pub struct ClauseSubscription<'s> {
    session: &'s Session,
    registration: RegistrationId,
    key: usize,
}

impl<'s> ClauseSubscription<'s> {
    /// Registers `handler` for clause inferences on `session`.
    ///
    /// Fails with [`BridgeError::Registration`] when the engine refuses the
    /// registration (for instance because the session is already finalized),
    /// leaving no native or bridge state behind.
    pub fn new(
        session: &'s Session,
        handler: impl ClauseHandler + 'static,
    ) -> Result<ClauseSubscription<'s>, BridgeError> {
        let state = Arc::new(DispatchState {
            session: session.shared(),
            handler: Mutex::new(Box::new(handler)),
        });
        let key = REGISTRY.lock().insert(state);
        // SAFETY: the session is live for 's and the trampoline matches the
        // ABI callback typedef.
        let registration = unsafe {
            (session.api().register_on_clause)(
                session.raw(),
                key_to_user(key),
                on_clause_trampoline,
            )
        };
        if registration == 0 {
            REGISTRY.lock().remove(key);
            log::debug!(
                "engine refused clause-callback registration on session {:p}",
                session.raw()
            );
            return Err(BridgeError::Registration);
        }
        log::debug!(
            "registered clause callback {} on session {:p}",
            registration,
            session.raw()
        );
        Ok(ClauseSubscription {
            session,
            registration,
            key,
        })
    }

    /// True until [`close`](ClauseSubscription::close) (or drop) has
    /// released the registration.
    pub fn is_active(&self) -> bool {
        self.registration != 0
    }

    /// The engine-side registration handle; zero once closed.
    pub fn registration_id(&self) -> RegistrationId {
        self.registration
    }

    /// Releases the native registration and the dispatch state.
    ///
    /// Idempotent: any number of calls, including on an already-closed
    /// subscription, performs no further work and signals no error. Once the
    /// first call returns, the engine delivers no more events for this
    /// subscription.
    pub fn close(&mut self) {
        if self.registration == 0 {
            return;
        }
        // SAFETY: the registration came from register_on_clause on this
        // session and is released exactly once.
        unsafe {
            (self.session.api().unregister_on_clause)(self.session.raw(), self.registration)
        };
        REGISTRY.lock().remove(self.key);
        log::debug!(
            "closed clause callback {} on session {:p}",
            self.registration,
            self.session.raw()
        );
        self.registration = 0;
    }
}

impl std::fmt::Debug for ClauseSubscription<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClauseSubscription")
            .field("registration", &self.registration)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Drop for ClauseSubscription<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fixed entry point the engine invokes for every clause inference.
///
/// Translates the raw event into scoped views and hands it to the handler:
/// a null derivation handle becomes `None`, the dependency indices become a
/// borrowed slice, the literals handle becomes a [`TermVec`]. Exactly one
/// handler invocation per event, no buffering or reordering, nothing passed
/// back to the engine.
unsafe extern "C" fn on_clause_trampoline(
    user: *mut c_void,
    derivation: *mut RawTerm,
    num_deps: c_uint,
    deps: *const c_uint,
    literals: *mut RawTermVec,
) {
    let state = {
        let registry = REGISTRY.lock();
        user_to_key(user).and_then(|key| registry.get(key).cloned())
    };
    let state = match state {
        Some(state) => state,
        None => {
            // The engine contract rules this out: events stop at teardown.
            log::error!("clause event for unknown dispatch key {:p}", user);
            return;
        }
    };
    let deps: &[u32] = if num_deps == 0 {
        &[]
    } else {
        // SAFETY: the engine passes num_deps valid indices when nonzero.
        unsafe { slice::from_raw_parts(deps as *const u32, num_deps as usize) }
    };
    let literals = match NonNull::new(literals) {
        Some(literals) => literals,
        None => {
            log::error!("clause event with null literal collection; event dropped");
            return;
        }
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let derivation = NonNull::new(derivation).map(|raw| Term::from_raw(state.session, raw));
        let literals = TermVec::from_raw(state.session, literals);
        log::trace!(
            "clause event: derivation={} deps={} literals={}",
            derivation.is_some(),
            deps.len(),
            literals.len()
        );
        state.handler.lock().on_clause(derivation, deps, literals);
    }));
    if let Err(payload) = outcome {
        log::error!(
            "clause handler panicked; event dropped: {}",
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_keys_round_trip_without_hitting_null() {
        for key in [0usize, 1, 7, usize::MAX - 1] {
            let user = key_to_user(key);
            assert!(!user.is_null());
            assert_eq!(user_to_key(user), Some(key));
        }
        assert_eq!(user_to_key(std::ptr::null_mut()), None);
    }

    #[test]
    fn panic_payloads_render_for_strs_and_strings() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
