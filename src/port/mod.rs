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

//! Controller port protocol engine
//!
//! This module implements the master side of the synchronous, ack-paced
//! serial protocol the PlayStation uses to poll controllers.
//!
//! # Exchange Protocol
//!
//! One transfer proceeds as follows:
//!
//! 1. Assert select (drive the line low) and wait the attention delay so
//!    the device can wake up.
//! 2. Exchange bytes full-duplex, one at a time. After each received byte
//!    (except the last requested one) wait for the device's acknowledge
//!    pulse before clocking out the next byte.
//! 3. If the pulse does not arrive within the acknowledge timeout the
//!    device has nothing further to send: stop there.
//! 4. Wait for the shift register to go idle, deassert select, and report
//!    how many bytes were actually exchanged.
//!
//! # Engine Structure
//!
//! The exchange is driven entirely by three interrupt handlers:
//!
//! - [`Port::handle_timer_irq`] — attention delay and acknowledge timeout
//!   expiries (distinguished by which interval was last armed)
//! - [`Port::handle_ack_irq`] — the device's pacing pulse
//! - [`Port::handle_serial_irq`] — shift register free / byte received
//!
//! No handler blocks and handlers never call each other. They hand control
//! to one another by enabling exactly the event source that should fire
//! next and leave everything else disabled, so at most one of
//! {next byte starts, timeout aborts} can ever happen after a byte. The
//! submitting thread parks on a [`Completion`] until one of the handlers
//! reaches a terminal phase.

use std::sync::Mutex;

use crate::error::{DriverError, Result};
use crate::hal::{AckLine, OneShotTimer, SerialLink};
use crate::signal::Completion;

/// Capacity of the driver's transfer buffer in bytes
pub const BUFFER_CAPACITY: usize = 32;

/// Settle time between asserting select and the first byte, in microseconds
pub const ATTENTION_DELAY_US: u32 = 20;

/// Maximum wait for the device's acknowledge pulse, in microseconds
pub const ACK_TIMEOUT_US: u32 = 100;

/// Logical timing intervals of the exchange
///
/// These are parameters of the engine, not hardwired logic; the defaults
/// are the reference values used on real hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Settle time after select, before the first byte (microseconds)
    pub attention_delay_us: u32,
    /// Wait for the pacing pulse before declaring end-of-response
    /// (microseconds)
    pub ack_timeout_us: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            attention_delay_us: ATTENTION_DELAY_US,
            ack_timeout_us: ACK_TIMEOUT_US,
        }
    }
}

/// Protocol phase of the in-flight transfer
///
/// Legal transitions:
///
/// ```text
/// Idle -> AttentionDelay -> TransmitPending -> ReceivePending
///             +-------------------^                 |
///             |                                     v
///             +--- AckWait <---(remaining != 0)-----+
///                     |                             |
///               (timeout)                    (remaining == 0)
///                     v                             v
///                 TimedOut                       Complete
/// ```
///
/// `TimedOut` and `Complete` are terminal; `send` resets to `Idle` after
/// copying the result out. Any other transition is a logic fault and
/// panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No transfer in flight
    Idle,
    /// Select asserted, waiting out the attention delay
    AttentionDelay,
    /// Waiting for the shift register to accept the next byte
    TransmitPending,
    /// Byte is shifting, waiting for the received byte
    ReceivePending,
    /// Waiting for the device's pacing pulse (or its timeout)
    AckWait,
    /// All requested bytes exchanged
    Complete,
    /// Device stopped acknowledging before the buffer was exhausted
    TimedOut,
}

/// Which one-shot interval was last armed
///
/// The timer handler distinguishes its two expiry kinds by this record;
/// an expiry with nothing armed is a logic fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmedTimer {
    /// Attention delay after asserting select
    Attention,
    /// Acknowledge timeout after a received byte
    AckTimeout,
}

/// Shared transfer state
///
/// Mutated only by the handlers (under the state lock) and read by `send`
/// after the completion signal has been consumed. The invariant
/// `position + remaining == len` holds at every observable point: both
/// counters advance together in the transmit branch.
#[derive(Debug)]
struct Transfer {
    /// Exchange buffer; outgoing bytes are overwritten in place by the
    /// device's responses as the transfer progresses
    buffer: [u8; BUFFER_CAPACITY],
    /// Length of the submitted transfer
    len: usize,
    /// Index of the next byte to transmit; equals the number of bytes
    /// whose exchange has started
    position: usize,
    /// Bytes not yet transmitted; `0` is the unique full-completion
    /// terminal condition
    remaining: usize,
    /// Current protocol phase
    phase: Phase,
    /// Which interval the one-shot timer is currently armed for
    armed: Option<ArmedTimer>,
}

impl Transfer {
    fn idle() -> Self {
        Self {
            buffer: [0xFF; BUFFER_CAPACITY],
            len: 0,
            position: 0,
            remaining: 0,
            phase: Phase::Idle,
            armed: None,
        }
    }
}

/// Master side of one controller port
///
/// Owns the HAL handles for the port's serial link, acknowledge input and
/// one-shot timer, plus the shared transfer state the interrupt handlers
/// advance. One `Port` per physical port; construct it once at startup and
/// hand references to whatever installs the interrupt bindings.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use padbus::port::Port;
/// use padbus::sim::{DigitalPad, SimBus};
///
/// let bus = SimBus::new(Box::new(DigitalPad::new()));
/// let port = Arc::new(Port::new(bus.serial(), bus.ack_line(), bus.timer()));
///
/// let service = {
///     let bus = bus.clone();
///     let port = Arc::clone(&port);
///     std::thread::spawn(move || bus.service(&port))
/// };
///
/// let mut poll = [0x01, 0x42, 0x00, 0x00, 0x00];
/// let exchanged = port.send(&mut poll, false).unwrap();
/// assert_eq!(exchanged, 5);
/// assert_eq!(poll[1], 0x41); // digital pad ID
///
/// bus.shutdown();
/// service.join().unwrap();
/// ```
pub struct Port<S: SerialLink, A: AckLine, T: OneShotTimer> {
    /// Serial shift register and select line
    serial: S,
    /// Acknowledge edge detector
    ack: A,
    /// One-shot timer shared by the attention delay and the ack timeout
    timer: T,
    /// Engine timing parameters
    timings: Timings,
    /// Shared transfer state
    state: Mutex<Transfer>,
    /// Terminal-condition handshake back to the submitting thread
    done: Completion,
}

impl<S: SerialLink, A: AckLine, T: OneShotTimer> Port<S, A, T> {
    /// Create a port with the reference timings
    pub fn new(serial: S, ack: A, timer: T) -> Self {
        Self::with_timings(serial, ack, timer, Timings::default())
    }

    /// Create a port with explicit timings
    pub fn with_timings(serial: S, ack: A, timer: T, timings: Timings) -> Self {
        Self {
            serial,
            ack,
            timer,
            timings,
            state: Mutex::new(Transfer::idle()),
            done: Completion::new(),
        }
    }

    /// Whether a transfer is currently in flight
    pub fn in_progress(&self) -> bool {
        self.state.lock().unwrap().phase != Phase::Idle
    }

    /// Perform one complete request/response exchange
    ///
    /// Copies `buffer` into the driver, drives select low, exchanges bytes
    /// one at a time paced by the device's acknowledge pulses, and blocks
    /// until the exchange terminates. The device signals the end of its
    /// response by *not* acknowledging, so the return value may be smaller
    /// than `buffer.len()`; that is not an error. The first
    /// `bytes_exchanged` elements of `buffer` are overwritten with the
    /// device's response, the rest are left untouched.
    ///
    /// `adaptive_length` is reserved for variable-length-response policies
    /// and currently has no effect: timeout-based early termination
    /// happens unconditionally.
    ///
    /// # Arguments
    ///
    /// * `buffer` - Command bytes to send; overwritten in place with the
    ///   response
    /// * `adaptive_length` - Reserved, currently inert
    ///
    /// # Returns
    ///
    /// Number of bytes actually exchanged
    ///
    /// # Errors
    ///
    /// - [`DriverError::BufferTooLong`] if `buffer` exceeds
    ///   [`BUFFER_CAPACITY`]
    /// - [`DriverError::TransferInProgress`] if another transfer has not
    ///   terminated yet
    pub fn send(&self, buffer: &mut [u8], adaptive_length: bool) -> Result<usize> {
        if buffer.len() > BUFFER_CAPACITY {
            return Err(DriverError::BufferTooLong {
                len: buffer.len(),
                capacity: BUFFER_CAPACITY,
            });
        }
        if buffer.is_empty() {
            return Ok(0);
        }

        {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::Idle {
                return Err(DriverError::TransferInProgress);
            }
            state.buffer[..buffer.len()].copy_from_slice(buffer);
            state.len = buffer.len();
            state.position = 0;
            state.remaining = buffer.len();
            state.phase = Phase::AttentionDelay;
            state.armed = Some(ArmedTimer::Attention);
        }

        log::debug!(
            "send: {} byte(s), adaptive_length={}",
            buffer.len(),
            adaptive_length
        );

        self.done.clear();
        self.serial.select();
        self.timer.arm(self.timings.attention_delay_us);

        self.done.wait_and_consume();

        // The final clock edges must fully complete before the select line
        // changes state; releasing it mid-byte corrupts the last bit on
        // some devices.
        while self.serial.busy() {
            std::hint::spin_loop();
        }
        self.serial.deselect();

        let exchanged;
        let timed_out;
        {
            let mut state = self.state.lock().unwrap();
            exchanged = state.position;
            timed_out = state.phase == Phase::TimedOut;
            buffer[..exchanged].copy_from_slice(&state.buffer[..exchanged]);
            state.phase = Phase::Idle;
            state.armed = None;
        }

        log::debug!(
            "send: exchanged {} of {} byte(s){}",
            exchanged,
            buffer.len(),
            if timed_out { " (ack timeout)" } else { "" }
        );

        Ok(exchanged)
    }

    /// One-shot timer expiry handler
    ///
    /// Fires for two distinct intervals, told apart by which one was last
    /// armed. Attention-delay expiry starts byte transmission by enabling
    /// the transmit-ready source; acknowledge-timeout expiry means the
    /// device has stopped responding, so it stops waiting for pulses and
    /// signals completion with whatever was exchanged so far.
    ///
    /// # Panics
    ///
    /// Panics if the timer expires with no interval armed, or in a phase
    /// the armed interval cannot legally expire in. Both indicate a
    /// logic/configuration fault; continuing would leave the engine in an
    /// undefined phase.
    pub fn handle_timer_irq(&self) {
        let armed = {
            let mut state = self.state.lock().unwrap();
            let armed = state.armed.take();
            match armed {
                Some(ArmedTimer::Attention) => {
                    assert_eq!(
                        state.phase,
                        Phase::AttentionDelay,
                        "attention delay expired outside of AttentionDelay"
                    );
                    state.phase = Phase::TransmitPending;
                }
                Some(ArmedTimer::AckTimeout) => {
                    assert_eq!(
                        state.phase,
                        Phase::AckWait,
                        "ack timeout expired outside of AckWait"
                    );
                    state.phase = Phase::TimedOut;
                }
                None => panic!("timer expired with no interval armed"),
            }
            debug_assert_eq!(state.position + state.remaining, state.len);
            armed
        };

        match armed {
            Some(ArmedTimer::Attention) => {
                log::trace!("attention delay elapsed, starting transmission");
                self.serial.set_tx_irq(true);
            }
            Some(ArmedTimer::AckTimeout) => {
                log::trace!("ack timeout, end of response");
                self.ack.set_irq(false);
                self.done.signal();
            }
            None => unreachable!(),
        }
    }

    /// Acknowledge-edge handler
    ///
    /// The device pulses the acknowledge line after each byte it has
    /// processed to request the next one. Exactly one pulse is expected
    /// per byte: the edge source is disabled here and re-armed only from
    /// the receive branch of [`handle_serial_irq`](Self::handle_serial_irq).
    pub fn handle_ack_irq(&self) {
        self.ack.clear_pending();
        self.ack.set_irq(false);
        // The pulse won the race; the timeout must not fire for this byte.
        self.timer.cancel();

        {
            let mut state = self.state.lock().unwrap();
            assert_eq!(
                state.phase,
                Phase::AckWait,
                "acknowledge edge outside of AckWait"
            );
            state.armed = None;
            state.phase = Phase::TransmitPending;
            debug_assert_eq!(state.position + state.remaining, state.len);
        }

        log::trace!("ack edge, starting next byte");
        self.serial.set_tx_irq(true);
    }

    /// Serial data handler
    ///
    /// Fires twice per byte: once when the shift register is free to
    /// accept outgoing data, once when the incoming byte has arrived. Both
    /// branches may run in one invocation if both flags are set; transmit
    /// runs first because the position it advances is the index the
    /// receive branch stores to.
    pub fn handle_serial_irq(&self) {
        if self.serial.tx_irq_enabled() && self.serial.tx_ready() {
            let byte = {
                let mut state = self.state.lock().unwrap();
                assert_eq!(
                    state.phase,
                    Phase::TransmitPending,
                    "transmit-ready outside of TransmitPending"
                );
                let byte = state.buffer[state.position];
                state.position += 1;
                state.remaining -= 1;
                state.phase = Phase::ReceivePending;
                debug_assert_eq!(state.position + state.remaining, state.len);
                byte
            };

            log::trace!("tx 0x{:02X}", byte);
            self.serial.write_data(byte);
            // Exactly one of the two serial sources is awaited per byte.
            self.serial.set_tx_irq(false);
            self.serial.set_rx_irq(true);
        }

        if self.serial.rx_ready() {
            let byte = self.serial.read_data();
            self.serial.set_rx_irq(false);

            let remaining = {
                let mut state = self.state.lock().unwrap();
                assert_eq!(
                    state.phase,
                    Phase::ReceivePending,
                    "data-received outside of ReceivePending"
                );
                let index = state.position - 1;
                state.buffer[index] = byte;
                if state.remaining != 0 {
                    state.phase = Phase::AckWait;
                    state.armed = Some(ArmedTimer::AckTimeout);
                } else {
                    state.phase = Phase::Complete;
                }
                debug_assert_eq!(state.position + state.remaining, state.len);
                state.remaining
            };

            log::trace!("rx 0x{:02X}, {} byte(s) remaining", byte, remaining);

            if remaining != 0 {
                // A pulse latched while the source was disabled belongs to
                // a byte that is already settled; it must not fire now.
                self.ack.clear_pending();
                self.ack.set_irq(true);
                self.timer.arm(self.timings.ack_timeout_us);
            } else {
                // No acknowledgement is awaited after the final byte.
                self.done.signal();
            }
        }
    }
}

#[cfg(test)]
mod tests;
