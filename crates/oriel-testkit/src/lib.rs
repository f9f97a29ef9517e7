//! Scripted engine double for exercising the clause-callback bindings.
//!
//! [`ScriptedEngine`] is not a solver. It owns one session, a term arena,
//! and a script of inference events; [`ScriptedEngine::solve`] replays the
//! script through every live registration via the same C ABI a real engine
//! would use. Tests drive it to observe delivery, teardown, and proxy
//! lifetimes from the engine's side of the boundary, including the
//! bookkeeping a real engine does for duplicated terms.

use std::ffi::CString;
use std::os::raw::{c_char, c_uint, c_void};
use std::ptr;

use parking_lot::Mutex;
use slab::Slab;

use oriel_abi::{
    ClauseEventFn, EngineApi, RawSession, RawTerm, RawTermVec, RegistrationId, ABI_VERSION,
};

/// One term in the arena. Script terms stay live for the whole session;
/// duplicates are created by `term_dup` and removed by `term_release`.
struct TermEntry {
    text: String,
    duplicate: bool,
}

/// One scripted inference event. Indices point into the session arenas.
struct ScriptedEvent {
    derivation: Option<usize>,
    deps: Vec<c_uint>,
    literals: usize,
}

struct Registration {
    id: RegistrationId,
    user: *mut c_void,
    callback: ClauseEventFn,
}

/// Engine-side state behind one `RawSession` handle. All access goes
/// through the session mutex; nothing is borrowed across a callback
/// invocation.
struct SessionState {
    terms: Slab<TermEntry>,
    vecs: Slab<Vec<usize>>,
    script: Vec<ScriptedEvent>,
    registrations: Vec<Registration>,
    next_registration: RegistrationId,
    finalized: bool,
    /// Last string rendered by `term_text`; parked here so the returned
    /// pointer stays valid until the next call into the session.
    text_buf: Option<CString>,
}

impl SessionState {
    fn new() -> SessionState {
        SessionState {
            terms: Slab::new(),
            vecs: Slab::new(),
            script: Vec::new(),
            registrations: Vec::new(),
            next_registration: 1,
            finalized: false,
            text_buf: None,
        }
    }
}

struct SessionCore {
    state: Mutex<SessionState>,
}

// SAFETY: the raw pointers inside SessionState are opaque tokens (the
// registered user pointers), never dereferenced by the double; all state
// access is serialized by the session mutex, and the race probes in the
// bindings' integration suite run solve and teardown on different threads.
unsafe impl Send for SessionCore {}
unsafe impl Sync for SessionCore {}

// Arena indices cross the boundary offset by one so no live handle is null.
fn term_ptr(index: usize) -> *mut RawTerm {
    (index + 1) as *mut RawTerm
}

fn term_index(raw: *mut RawTerm) -> Option<usize> {
    (raw as usize).checked_sub(1)
}

fn vec_ptr(index: usize) -> *mut RawTermVec {
    (index + 1) as *mut RawTermVec
}

fn vec_index(raw: *mut RawTermVec) -> Option<usize> {
    (raw as usize).checked_sub(1)
}

fn core_of<'a>(session: *mut RawSession) -> &'a SessionCore {
    // SAFETY: every RawSession handle the double hands out points at the
    // SessionCore boxed inside a live ScriptedEngine.
    unsafe { &*(session as *const SessionCore) }
}

unsafe extern "C" fn register_on_clause(
    session: *mut RawSession,
    user: *mut c_void,
    callback: ClauseEventFn,
) -> RegistrationId {
    let mut state = core_of(session).state.lock();
    if state.finalized {
        log::debug!("scripted session refused a registration after finalize");
        return 0;
    }
    let id = state.next_registration;
    state.next_registration += 1;
    state.registrations.push(Registration { id, user, callback });
    id
}

unsafe extern "C" fn unregister_on_clause(session: *mut RawSession, registration: RegistrationId) {
    let mut state = core_of(session).state.lock();
    state.registrations.retain(|r| r.id != registration);
}

unsafe extern "C" fn term_dup(session: *mut RawSession, term: *mut RawTerm) -> *mut RawTerm {
    let mut state = core_of(session).state.lock();
    let Some(index) = term_index(term) else {
        return ptr::null_mut();
    };
    let text = match state.terms.get(index) {
        Some(entry) => entry.text.clone(),
        None => return ptr::null_mut(),
    };
    term_ptr(state.terms.insert(TermEntry {
        text,
        duplicate: true,
    }))
}

unsafe extern "C" fn term_release(session: *mut RawSession, term: *mut RawTerm) {
    let mut state = core_of(session).state.lock();
    let Some(index) = term_index(term) else {
        log::error!("release of the null term handle");
        return;
    };
    match state.terms.get(index) {
        Some(entry) if entry.duplicate => {
            state.terms.remove(index);
        }
        Some(_) => log::error!("release of a non-duplicate term handle {:p}", term),
        None => log::error!("release of an unknown term handle {:p}", term),
    }
}

unsafe extern "C" fn term_text(session: *mut RawSession, term: *mut RawTerm) -> *const c_char {
    let mut state = core_of(session).state.lock();
    let Some(index) = term_index(term) else {
        return ptr::null();
    };
    let text = match state.terms.get(index) {
        Some(entry) => entry.text.clone(),
        None => return ptr::null(),
    };
    state.text_buf = Some(CString::new(text).unwrap_or_default());
    match &state.text_buf {
        Some(buf) => buf.as_ptr(),
        None => ptr::null(),
    }
}

unsafe extern "C" fn term_vec_len(session: *mut RawSession, vec: *mut RawTermVec) -> c_uint {
    let state = core_of(session).state.lock();
    vec_index(vec)
        .and_then(|index| state.vecs.get(index))
        .map(|terms| terms.len() as c_uint)
        .unwrap_or(0)
}

unsafe extern "C" fn term_vec_get(
    session: *mut RawSession,
    vec: *mut RawTermVec,
    index: c_uint,
) -> *mut RawTerm {
    let state = core_of(session).state.lock();
    vec_index(vec)
        .and_then(|v| state.vecs.get(v))
        .and_then(|terms| terms.get(index as usize))
        .map(|&term| term_ptr(term))
        .unwrap_or(ptr::null_mut())
}

/// The entry-point table every scripted session shares.
static ENGINE_API: EngineApi = EngineApi {
    abi_version: ABI_VERSION,
    register_on_clause,
    unregister_on_clause,
    term_dup,
    term_release,
    term_text,
    term_vec_len,
    term_vec_get,
};

/// A table claiming an ABI revision the bindings do not speak.
static MISMATCHED_API: EngineApi = EngineApi {
    abi_version: ABI_VERSION + 1,
    register_on_clause,
    unregister_on_clause,
    term_dup,
    term_release,
    term_text,
    term_vec_len,
    term_vec_get,
};

/// A scripted engine owning one session.
///
/// Build the script with [`push_inference`](ScriptedEngine::push_inference),
/// register callbacks through the raw handle and table, then
/// [`solve`](ScriptedEngine::solve) to replay the script. The engine must
/// outlive everything registered against its session.
pub struct ScriptedEngine {
    core: Box<SessionCore>,
}

impl ScriptedEngine {
    pub fn new() -> ScriptedEngine {
        ScriptedEngine {
            core: Box::new(SessionCore {
                state: Mutex::new(SessionState::new()),
            }),
        }
    }

    /// The entry-point table every scripted session shares.
    pub fn api() -> &'static EngineApi {
        &ENGINE_API
    }

    /// A table claiming an ABI revision the bindings do not speak; for
    /// exercising version checks.
    pub fn mismatched_api() -> &'static EngineApi {
        &MISMATCHED_API
    }

    /// Raw handle of this engine's session.
    pub fn session(&self) -> *mut RawSession {
        &*self.core as *const SessionCore as *mut RawSession
    }

    /// Appends a scripted inference.
    ///
    /// `derivation` is the rendered text of the optional justification term,
    /// `deps` the dependency indices to forward verbatim, `literals` the
    /// rendered texts of the clause's literals.
    pub fn push_inference(&self, derivation: Option<&str>, deps: &[u32], literals: &[&str]) {
        let mut state = self.core.state.lock();
        let derivation = derivation.map(|text| {
            state.terms.insert(TermEntry {
                text: text.to_owned(),
                duplicate: false,
            })
        });
        let mut clause = Vec::with_capacity(literals.len());
        for text in literals {
            clause.push(state.terms.insert(TermEntry {
                text: (*text).to_owned(),
                duplicate: false,
            }));
        }
        let literals = state.vecs.insert(clause);
        state.script.push(ScriptedEvent {
            derivation,
            deps: deps.to_vec(),
            literals,
        });
    }

    /// Replays every scripted inference through the live registrations, in
    /// script order, the way a solving run would report them.
    ///
    /// The registration list is re-read per event, so a registration torn
    /// down mid-replay receives no later events.
    pub fn solve(&self) {
        let event_count = self.core.state.lock().script.len();
        for index in 0..event_count {
            let (derivation, deps, literals, targets) = {
                let state = self.core.state.lock();
                let event = &state.script[index];
                (
                    event.derivation.map(term_ptr).unwrap_or(ptr::null_mut()),
                    event.deps.clone(),
                    vec_ptr(event.literals),
                    state
                        .registrations
                        .iter()
                        .map(|r| (r.callback, r.user))
                        .collect::<Vec<_>>(),
                )
            };
            let deps_ptr = if deps.is_empty() {
                ptr::null()
            } else {
                deps.as_ptr()
            };
            for (callback, user) in targets {
                // SAFETY: the handles index live arena entries and the
                // callback was registered against this session with the
                // matching ABI typedef. The session lock is released, so the
                // callback may call back into the table.
                unsafe { callback(user, derivation, deps.len() as c_uint, deps_ptr, literals) };
            }
        }
    }

    /// Marks the session finalized: later registrations are refused with the
    /// zero handle.
    pub fn finalize(&self) {
        self.core.state.lock().finalized = true;
    }

    /// Raw handle the session will pass for event `index`'s derivation, if
    /// that event carries one.
    pub fn derivation_handle(&self, index: usize) -> Option<*mut RawTerm> {
        self.core
            .state
            .lock()
            .script
            .get(index)
            .and_then(|event| event.derivation)
            .map(term_ptr)
    }

    /// Number of registrations currently live on the session.
    pub fn live_registrations(&self) -> usize {
        self.core.state.lock().registrations.len()
    }

    /// Number of duplicated terms not yet released. Zero once every owned
    /// duplicate on the bindings side has been dropped.
    pub fn live_duplicates(&self) -> usize {
        self.core
            .state
            .lock()
            .terms
            .iter()
            .filter(|(_, entry)| entry.duplicate)
            .count()
    }
}

impl Default for ScriptedEngine {
    fn default() -> ScriptedEngine {
        ScriptedEngine::new()
    }
}
