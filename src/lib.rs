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

//! padbus: master-side driver for the PlayStation controller serial bus
//!
//! This crate drives one controller port of the synchronous, ack-paced
//! serial bus used to poll PlayStation controllers: assert select, wait
//! the attention delay, exchange bytes full-duplex one at a time, pace
//! each next byte on the device's acknowledge pulse, and detect the end
//! of the response when the pulse stops coming.
//!
//! # Architecture
//!
//! - [`port`]: the protocol engine — shared transfer state, the three
//!   interrupt handlers that advance it, and the blocking
//!   [`Port::send`](port::Port::send) entry point
//! - [`hal`]: the traits platform bring-up code implements so the engine
//!   can reach the serial shift register, the acknowledge edge detector
//!   and the one-shot timer
//! - [`signal`]: the auto-reset completion event between interrupt
//!   context and the submitting thread
//! - [`sim`]: a discrete-event simulation of the hardware side plus
//!   simulated devices, used by the test suite and usable from host code
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use padbus::sim::{ScriptedDevice, SimBus};
//! use padbus::Port;
//!
//! // A device that answers a 3-byte poll and paces every byte.
//! let device = ScriptedDevice::new(vec![0xFF, 0x41, 0x5A], 8);
//! let bus = SimBus::new(Box::new(device));
//! let port = Arc::new(Port::new(bus.serial(), bus.ack_line(), bus.timer()));
//!
//! let service = {
//!     let (bus, port) = (bus.clone(), Arc::clone(&port));
//!     std::thread::spawn(move || bus.service(&port))
//! };
//!
//! let mut poll = [0x01, 0x42, 0x00];
//! let exchanged = port.send(&mut poll, false)?;
//! assert_eq!(exchanged, 3);
//! assert_eq!(poll, [0xFF, 0x41, 0x5A]);
//!
//! bus.shutdown();
//! service.join().unwrap();
//! # Ok::<(), padbus::DriverError>(())
//! ```
//!
//! # Error Handling
//!
//! Only caller precondition violations return [`DriverError`]. An
//! acknowledge timeout is the protocol's end-of-response mechanism and
//! shows up as a short byte count, never as an error.

pub mod error;
pub mod hal;
pub mod port;
pub mod signal;
pub mod sim;

// Re-export commonly used types
pub use error::{DriverError, Result};
pub use port::{Port, Timings, ACK_TIMEOUT_US, ATTENTION_DELAY_US, BUFFER_CAPACITY};
