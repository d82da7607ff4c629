// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Completion signal
//!
//! A binary auto-reset event that carries the "transfer terminated"
//! handshake from interrupt context back to the thread blocked in
//! [`Port::send`](crate::port::Port::send). One instance is created per
//! port and reused across transfers.

use std::sync::{Condvar, Mutex};

/// Binary condition with auto-reset wait semantics
///
/// - [`clear`](Self::clear) — idempotent; called by the submitting side
///   before a transfer starts.
/// - [`signal`](Self::signal) — idempotent; called by whichever handler
///   reaches a terminal condition.
/// - [`wait_and_consume`](Self::wait_and_consume) — blocks until `signal`
///   has been invoked since the last `clear`, then atomically resets the
///   condition before returning.
#[derive(Debug, Default)]
pub struct Completion {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    /// Create a new, unsignalled completion
    pub fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Reset the condition to unsignalled
    pub fn clear(&self) {
        *self.signalled.lock().unwrap() = false;
    }

    /// Mark the condition signalled and wake a waiter
    pub fn signal(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        *signalled = true;
        self.cond.notify_one();
    }

    /// Block until signalled, then consume the signal
    ///
    /// The observe-and-clear happens under a single lock acquisition, so a
    /// signal can never be consumed twice and a consumed signal can never
    /// satisfy a later wait.
    pub fn wait_and_consume(&self) {
        let mut signalled = self.signalled.lock().unwrap();
        while !*signalled {
            signalled = self.cond.wait(signalled).unwrap();
        }
        *signalled = false;
    }
}
