//! Memoization of resolved allocator state.
//!
//! Every lazily resolved value lives in a [`Slot`], which walks through
//! the states described by [`ResolutionState`]. Successful resolutions
//! are remembered until the slot is reset; failures are recorded but
//! retried on next access, as they may be caused by an allocator that
//! simply has not been initialized yet.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::log::trace;
use crate::Error;
use crate::ErrorKind;
use crate::Result;
use crate::ThreadId;


/// The resolution state of a lazily computed value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolutionState {
    /// No resolution has been attempted since the last reset.
    Unresolved,
    /// A resolution is currently in progress.
    Resolving,
    /// The value has been resolved and is memoized.
    Resolved,
    /// The last resolution attempt failed.
    Unresolvable,
}


#[derive(Debug)]
enum SlotState<T> {
    Unresolved,
    Resolving,
    Resolved(T),
    Unresolvable,
}


/// A memoizing container for a single lazily resolved value.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    name: &'static str,
    state: RefCell<SlotState<T>>,
}

impl<T> Slot<T>
where
    T: Clone,
{
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            state: RefCell::new(SlotState::Unresolved),
        }
    }

    /// Retrieve the memoized value or resolve it using `f`.
    ///
    /// Re-entering the resolution of the same slot from within `f` is
    /// reported as an error.
    pub(crate) fn get_or_try_resolve<F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        {
            let state = self.state.borrow();
            match &*state {
                SlotState::Resolved(value) => return Ok(value.clone()),
                SlotState::Resolving => {
                    return Err(Error::with_kind(
                        ErrorKind::Other,
                        format!("cyclic resolution of `{}` detected", self.name),
                    ))
                }
                SlotState::Unresolved | SlotState::Unresolvable => (),
            }
        }

        trace!("resolving `{}`", self.name);
        *self.state.borrow_mut() = SlotState::Resolving;
        let result = f();
        *self.state.borrow_mut() = match &result {
            Ok(value) => SlotState::Resolved(value.clone()),
            Err(..) => SlotState::Unresolvable,
        };
        result
    }

    pub(crate) fn state(&self) -> ResolutionState {
        match &*self.state.borrow() {
            SlotState::Unresolved => ResolutionState::Unresolved,
            SlotState::Resolving => ResolutionState::Resolving,
            SlotState::Resolved(..) => ResolutionState::Resolved,
            SlotState::Unresolvable => ResolutionState::Unresolvable,
        }
    }

    pub(crate) fn reset(&self) {
        *self.state.borrow_mut() = SlotState::Unresolved;
    }
}


/// A set of [`Slot`]s keyed by thread.
#[derive(Debug)]
pub(crate) struct ThreadSlots<T> {
    name: &'static str,
    slots: RefCell<HashMap<ThreadId, Rc<Slot<T>>>>,
}

impl<T> ThreadSlots<T>
where
    T: Clone,
{
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: RefCell::new(HashMap::new()),
        }
    }

    /// Retrieve the slot for `thread`, creating it if necessary.
    pub(crate) fn get(&self, thread: ThreadId) -> Rc<Slot<T>> {
        let mut slots = self.slots.borrow_mut();
        let slot = slots
            .entry(thread)
            .or_insert_with(|| Rc::new(Slot::new(self.name)));
        Rc::clone(slot)
    }

    pub(crate) fn state(&self, thread: ThreadId) -> ResolutionState {
        self.slots
            .borrow()
            .get(&thread)
            .map(|slot| slot.state())
            .unwrap_or(ResolutionState::Unresolved)
    }

    pub(crate) fn reset(&self) {
        let () = self.slots.borrow_mut().clear();
    }
}
