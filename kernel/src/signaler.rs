// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License. You may obtain a copy of
// the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the
// License for the specific language governing permissions and limitations under
// the License.

//! A multi-waiter "something may have happened" primitive.
//!
//! This is the `std`-hosted reading of `kernel::object::ObjectBase` /
//! `kernel::sync::event::Event` from pw_kernel: rather than an
//! intrusive, allocator-free waiter list threaded through `ForeignBox`,
//! waiters live in a plain `Vec` behind a `Mutex`, and blocking uses a
//! `Condvar` instead of the teacher's architecture-specific
//! `thread_condition_signaler`.
//!
//! The external poll multiplexer this core assumes (see spec §6) would
//! call [`Signaler::attach`] once per object it is interested in and
//! [`Signaler::wait`] (or an equivalent wrapper that polls many
//! waiters) to block; this core's own capabilities call
//! [`Signaler::broadcast`] whenever their state transitions.

use std::fmt;
use std::sync::{Condvar, Mutex};

/// Identifies a waiter previously registered with [`Signaler::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterToken(u64);

struct Waiter<T> {
    token: u64,
    predicate: Box<dyn Fn() -> bool + Send>,
    woken: bool,
    snapshot: Option<T>,
}

struct State<T> {
    waiters: Vec<Waiter<T>>,
    next_token: u64,
}

/// A condition source that can wake any number of attached waiters.
///
/// `T` is the type of the optional per-broadcast snapshot handed to
/// waiters (e.g. "bytes readable, hangup: bool" for a socket). Use `()`
/// when no snapshot is needed.
pub struct Signaler<T = ()> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

impl<T> fmt::Debug for Signaler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signaler").finish_non_exhaustive()
    }
}

impl<T> Default for Signaler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signaler<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                waiters: Vec::new(),
                next_token: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Register a waiter whose wake condition is `predicate`.
    ///
    /// `predicate` is evaluated immediately: if it already holds, the
    /// waiter is marked woken before this call returns and a
    /// subsequent [`Signaler::wait`] will not block. This is the
    /// "already satisfied" path required by spec §4.1 so that a waiter
    /// which attaches after the state transition it cares about still
    /// observes it.
    pub fn attach(&self, predicate: impl Fn() -> bool + Send + 'static) -> WaiterToken {
        let mut state = self.state.lock().unwrap();
        let token = state.next_token;
        state.next_token += 1;
        let already_satisfied = predicate();
        state.waiters.push(Waiter {
            token,
            predicate: Box::new(predicate),
            woken: already_satisfied,
            snapshot: None,
        });
        if already_satisfied {
            self.condvar.notify_all();
        }
        WaiterToken(token)
    }

    /// Remove a previously attached waiter. Idempotent.
    pub fn detach(&self, token: WaiterToken) {
        let mut state = self.state.lock().unwrap();
        state.waiters.retain(|w| w.token != token.0);
    }

    /// Wake every attached waiter whose predicate currently holds,
    /// handing each one the snapshot produced by `snapshot`.
    ///
    /// Idempotent with respect to spurious wake-ups: a waiter that is
    /// woken must re-check its own condition (this is true of every
    /// caller in this crate, which only trusts `Signaler` to mean "go
    /// look again", not "the thing you wanted is definitely true").
    pub fn broadcast(&self, snapshot: impl Fn() -> T) {
        let mut state = self.state.lock().unwrap();
        for waiter in &mut state.waiters {
            if (waiter.predicate)() {
                waiter.woken = true;
                waiter.snapshot = Some(snapshot());
            }
        }
        self.condvar.notify_all();
    }

    /// Block the calling thread until `token`'s waiter has been woken.
    ///
    /// Returns the snapshot captured at wake time, if any. A token that
    /// is not currently attached (e.g. already [`detach`](Self::detach)ed)
    /// returns immediately with `None`.
    pub fn wait(&self, token: WaiterToken) -> Option<T>
    where
        T: Clone,
    {
        let mut state = self.state.lock().unwrap();
        loop {
            match state.waiters.iter().find(|w| w.token == token.0) {
                None => return None,
                Some(w) if w.woken => return w.snapshot.clone(),
                Some(_) => {
                    state = self.condvar.wait(state).unwrap();
                }
            }
        }
    }

    /// Convenience wrapper: attach, wait, detach.
    pub fn wait_for(&self, predicate: impl Fn() -> bool + Send + 'static) -> Option<T>
    where
        T: Clone,
    {
        let token = self.attach(predicate);
        let snapshot = self.wait(token);
        self.detach(token);
        snapshot
    }
}
