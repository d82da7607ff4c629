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

//! Driver error types
//!
//! Only caller precondition violations are reported as errors. An
//! acknowledge timeout is part of the protocol (it marks the end of the
//! device's response) and is surfaced as a short byte count from
//! [`Port::send`](crate::port::Port::send), not as an error.

use thiserror::Error;

/// Errors reported at the `send` API boundary
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// The caller's buffer does not fit in the driver's transfer buffer.
    #[error("command of {len} bytes exceeds the {capacity}-byte transfer buffer")]
    BufferTooLong {
        /// Length of the rejected buffer
        len: usize,
        /// Capacity of the driver's transfer buffer
        capacity: usize,
    },

    /// Another transfer is still in flight on this port.
    ///
    /// The driver does not queue transfers; the caller must let one
    /// exchange terminate before submitting the next.
    #[error("a transfer is already in progress on this port")]
    TransferInProgress,
}

/// Result type for all fallible driver operations
pub type Result<T> = std::result::Result<T, DriverError>;
