//! Scoped views of native terms and the owning duplicates that outlive them.
//!
//! The engine invalidates every handle it passed to a clause callback the
//! moment the callback returns. [`Term`] and [`TermVec`] therefore borrow
//! the callback scope and cannot escape it; [`Term::duplicate`] is the one
//! way to keep term data alive afterwards.

use std::ffi::CStr;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use oriel_abi::{RawTerm, RawTermVec};

use crate::session::SessionRef;

/// Non-owning view of a native term, scoped to one callback invocation.
#[derive(Clone, Copy)]
pub struct Term<'cb> {
    session: SessionRef,
    raw: NonNull<RawTerm>,
    _scope: PhantomData<&'cb ()>,
}

impl<'cb> Term<'cb> {
    pub(crate) fn from_raw(session: SessionRef, raw: NonNull<RawTerm>) -> Term<'cb> {
        Term {
            session,
            raw,
            _scope: PhantomData,
        }
    }

    /// The underlying native handle.
    ///
    /// Useful for identity checks while the view is live; meaningless after
    /// the callback returns.
    pub fn raw(&self) -> *mut RawTerm {
        self.raw.as_ptr()
    }

    /// The term rendered in the engine's surface syntax.
    ///
    /// The engine-owned buffer is copied into an owned `String` before this
    /// returns, so the result is free of boundary lifetimes.
    pub fn text(&self) -> String {
        // SAFETY: the view is live for 'cb and the engine string is copied
        // before any further call into the session.
        unsafe {
            let text = (self.session.api.term_text)(self.session.raw.as_ptr(), self.raw.as_ptr());
            if text.is_null() {
                return String::new();
            }
            CStr::from_ptr(text).to_string_lossy().into_owned()
        }
    }

    /// Deep-copies the term so it survives the callback.
    ///
    /// # Panics
    ///
    /// Panics if the engine fails to duplicate a handle it just delivered,
    /// which breaks the callback contract.
    pub fn duplicate(&self) -> OwnedTerm {
        // SAFETY: the view is live for 'cb, so the handle is valid against
        // this session.
        let dup = unsafe { (self.session.api.term_dup)(self.session.raw.as_ptr(), self.raw.as_ptr()) };
        let raw = NonNull::new(dup).expect("engine failed to duplicate a live term");
        OwnedTerm {
            session: self.session,
            raw,
        }
    }
}

impl fmt::Debug for Term<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Term").field(&self.raw).finish()
    }
}

/// Owning duplicate of a term, produced by [`Term::duplicate`].
///
/// Releases the engine-side duplicate on drop. The duplicate is tied to the
/// session it came from and must be dropped before the engine finalizes that
/// session; the bindings cannot enforce this with a lifetime because owned
/// terms routinely leave the callback scope.
pub struct OwnedTerm {
    session: SessionRef,
    raw: NonNull<RawTerm>,
}

// SAFETY: an OwnedTerm is an opaque handle pair; the bindings never
// dereference it, and the engine serializes every call made through the
// table. Owned duplicates exist precisely to leave the callback scope, which
// may mean leaving the solving thread.
unsafe impl Send for OwnedTerm {}
unsafe impl Sync for OwnedTerm {}

impl OwnedTerm {
    /// The underlying native handle of the duplicate.
    pub fn raw(&self) -> *mut RawTerm {
        self.raw.as_ptr()
    }

    /// The term rendered in the engine's surface syntax.
    pub fn text(&self) -> String {
        self.as_term().text()
    }

    /// Re-borrows the duplicate as a scoped view.
    pub fn as_term(&self) -> Term<'_> {
        Term::from_raw(self.session, self.raw)
    }
}

impl Drop for OwnedTerm {
    fn drop(&mut self) {
        // SAFETY: raw came from term_dup on this session and is released
        // exactly once.
        unsafe { (self.session.api.term_release)(self.session.raw.as_ptr(), self.raw.as_ptr()) };
    }
}

impl fmt::Debug for OwnedTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedTerm").field(&self.raw).finish()
    }
}

/// Non-owning view of the literal collection handed to a clause callback.
#[derive(Clone, Copy)]
pub struct TermVec<'cb> {
    session: SessionRef,
    raw: NonNull<RawTermVec>,
    _scope: PhantomData<&'cb ()>,
}

impl<'cb> TermVec<'cb> {
    pub(crate) fn from_raw(session: SessionRef, raw: NonNull<RawTermVec>) -> TermVec<'cb> {
        TermVec {
            session,
            raw,
            _scope: PhantomData,
        }
    }

    /// The underlying native collection handle.
    pub fn raw(&self) -> *mut RawTermVec {
        self.raw.as_ptr()
    }

    /// Number of literals in the collection.
    pub fn len(&self) -> usize {
        // SAFETY: the view is live for 'cb.
        unsafe { (self.session.api.term_vec_len)(self.session.raw.as_ptr(), self.raw.as_ptr()) as usize }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows the literal at `index`; `None` when out of bounds.
    pub fn get(&self, index: usize) -> Option<Term<'cb>> {
        // SAFETY: the view is live for 'cb; the engine bounds-checks and
        // returns null past the end.
        let raw = unsafe {
            (self.session.api.term_vec_get)(
                self.session.raw.as_ptr(),
                self.raw.as_ptr(),
                index as std::os::raw::c_uint,
            )
        };
        NonNull::new(raw).map(|raw| Term::from_raw(self.session, raw))
    }

    /// Iterates the literals in collection order.
    pub fn iter(&self) -> impl Iterator<Item = Term<'cb>> + '_ {
        (0..self.len()).filter_map(move |index| self.get(index))
    }

    /// Deep-copies every literal so the clause survives the callback.
    pub fn duplicate(&self) -> Vec<OwnedTerm> {
        self.iter().map(|term| term.duplicate()).collect()
    }
}

impl fmt::Debug for TermVec<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TermVec").field(&self.raw).finish()
    }
}
