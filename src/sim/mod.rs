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

//! Simulated controller bus
//!
//! A discrete-event model of the hardware below the [`crate::hal`]
//! boundary: the serial shift register with its status flags, the
//! acknowledge edge detector, the one-shot timer, and a remote device on
//! the other end of the cable. Time is virtual (microseconds) and advances
//! only when an event is due, so tests involving the 100 µs acknowledge
//! timeout run instantly and deterministically.
//!
//! # Wiring
//!
//! [`SimBus`] hands out the three HAL handles a [`Port`] needs; a service
//! thread runs [`SimBus::service`], which plays the role of the interrupt
//! controller: it pops due events, maintains the status flags, and invokes
//! the port's handlers whenever an enabled source has a pending condition.
//!
//! # Devices
//!
//! The remote end implements [`SimDevice`]. [`ScriptedDevice`] replays a
//! fixed response and grants a fixed number of acknowledge pulses;
//! [`DigitalPad`] models the standard digital controller (ID 0x41,
//! active-low button halfwords) including its pacing behavior.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex};

use bitflags::bitflags;

use crate::hal::{AckLine, OneShotTimer, SerialLink};
use crate::port::Port;

/// Time to shift one byte at the reference 250 kHz bus clock, in
/// microseconds
pub const BYTE_TIME_US: u64 = 32;

/// Delay between a completed byte and the pad's acknowledge pulse
pub const PAD_ACK_DELAY_US: u32 = 10;

bitflags! {
    /// Status flags of the simulated serial port
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Shift register free to accept outgoing data
        const TX_READY = 1 << 0;
        /// Received byte waiting in the receive register
        const RX_READY = 1 << 1;
        /// Clock edges still being generated
        const BUSY = 1 << 2;
    }
}

/// Remote device on the other end of the bus
pub trait SimDevice: Send {
    /// The select line was asserted; a new exchange is starting.
    fn on_select(&mut self) {}

    /// Exchange one byte (full duplex).
    ///
    /// # Arguments
    ///
    /// * `tx` - Byte shifted out by the master
    ///
    /// # Returns
    ///
    /// The device's response byte, and the delay in microseconds before it
    /// pulses the acknowledge line — or `None` if it does not acknowledge
    /// this byte.
    fn exchange(&mut self, tx: u8) -> (u8, Option<u32>);
}

/// Event kinds on the virtual timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    /// One-shot timer expiry; stale generations are discarded
    TimerExpiry { generation: u64 },
    /// The byte loaded into the shift register has finished shifting
    ByteShifted,
    /// The device's acknowledge pulse reaches the edge detector
    AckPulse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Event {
    at: u64,
    seq: u64,
    kind: EventKind,
}

/// Shared state of the simulated bus
struct BusInner {
    /// Virtual clock, microseconds
    now_us: u64,
    /// Tie-breaker for events due at the same instant
    seq: u64,
    events: BinaryHeap<Reverse<Event>>,
    status: Status,
    tx_irq: bool,
    rx_irq: bool,
    ack_irq: bool,
    /// Edge detector latch; set by a pulse even while the irq is disabled
    ack_pending: bool,
    selected: bool,
    data_out: u8,
    data_in: u8,
    /// Bumped on every arm/cancel so superseded expiries never fire
    timer_generation: u64,
    shutdown: bool,
    /// Fault latch: the select line changed state mid-byte
    deselected_while_busy: bool,
    device: Box<dyn SimDevice>,
}

impl BusInner {
    fn schedule(&mut self, kind: EventKind, delay_us: u64) {
        self.seq += 1;
        self.events.push(Reverse(Event {
            at: self.now_us + delay_us,
            seq: self.seq,
            kind,
        }));
    }

    /// The shift register finished clocking a byte: latch the device's
    /// response and schedule its acknowledge pulse, if it grants one.
    fn complete_shift(&mut self) {
        self.status.insert(Status::TX_READY);
        self.status.remove(Status::BUSY);

        let (response, ack_delay) = if self.selected {
            self.device.exchange(self.data_out)
        } else {
            // Nothing addressed: the line floats high.
            (0xFF, None)
        };
        self.data_in = response;
        self.status.insert(Status::RX_READY);

        log::trace!(
            "shift complete: tx=0x{:02X} rx=0x{:02X} ack={:?}",
            self.data_out,
            response,
            ack_delay
        );

        if let Some(delay) = ack_delay {
            self.schedule(EventKind::AckPulse, u64::from(delay));
        }
    }
}

struct Shared {
    bus: Mutex<BusInner>,
    cond: Condvar,
}

impl Shared {
    /// Mutate the bus and wake the service loop.
    fn update<R>(&self, f: impl FnOnce(&mut BusInner) -> R) -> R {
        let result = f(&mut self.bus.lock().unwrap());
        self.cond.notify_all();
        result
    }

    fn read<R>(&self, f: impl FnOnce(&BusInner) -> R) -> R {
        f(&self.bus.lock().unwrap())
    }
}

/// What the service loop should do next
enum Step {
    Serial,
    Ack,
    Timer,
    Stop,
}

/// Simulated controller bus
///
/// Cheap to clone; all clones and all HAL handles share one bus state.
///
/// # Examples
///
/// See [`Port`] for an end-to-end exchange against a [`DigitalPad`].
#[derive(Clone)]
pub struct SimBus {
    shared: Arc<Shared>,
}

impl SimBus {
    /// Create a bus with `device` on the remote end
    pub fn new(device: Box<dyn SimDevice>) -> Self {
        Self {
            shared: Arc::new(Shared {
                bus: Mutex::new(BusInner {
                    now_us: 0,
                    seq: 0,
                    events: BinaryHeap::new(),
                    status: Status::TX_READY,
                    tx_irq: false,
                    rx_irq: false,
                    ack_irq: false,
                    ack_pending: false,
                    selected: false,
                    data_out: 0xFF,
                    data_in: 0xFF,
                    timer_generation: 0,
                    shutdown: false,
                    deselected_while_busy: false,
                    device,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Serial link HAL handle
    pub fn serial(&self) -> SimSerial {
        SimSerial {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Acknowledge line HAL handle
    pub fn ack_line(&self) -> SimAckLine {
        SimAckLine {
            shared: Arc::clone(&self.shared),
        }
    }

    /// One-shot timer HAL handle
    pub fn timer(&self) -> SimTimer {
        SimTimer {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Ask the service loop to exit
    pub fn shutdown(&self) {
        self.shared.update(|bus| bus.shutdown = true);
    }

    /// Whether the select line was ever released while a byte was still
    /// shifting (a protocol fault on the master's part)
    pub fn deselected_while_busy(&self) -> bool {
        self.shared.read(|bus| bus.deselected_while_busy)
    }

    /// Service the bus: dispatch interrupts to `port` until
    /// [`shutdown`](Self::shutdown)
    ///
    /// Plays the interrupt controller. Pending conditions on enabled
    /// sources are dispatched before virtual time advances; when nothing
    /// is pending and no event is due, the loop parks until the port arms
    /// something.
    pub fn service(&self, port: &Port<SimSerial, SimAckLine, SimTimer>) {
        loop {
            match self.next_step() {
                Step::Serial => port.handle_serial_irq(),
                Step::Ack => port.handle_ack_irq(),
                Step::Timer => port.handle_timer_irq(),
                Step::Stop => break,
            }
        }
    }

    fn next_step(&self) -> Step {
        let mut bus = self.shared.bus.lock().unwrap();
        loop {
            if bus.shutdown {
                return Step::Stop;
            }
            // Interrupt conditions are level-checked against the enables
            // at dispatch time, the way a real interrupt controller masks
            // them.
            if (bus.tx_irq && bus.status.contains(Status::TX_READY))
                || (bus.rx_irq && bus.status.contains(Status::RX_READY))
            {
                return Step::Serial;
            }
            if bus.ack_irq && bus.ack_pending {
                return Step::Ack;
            }
            if let Some(Reverse(event)) = bus.events.pop() {
                bus.now_us = event.at;
                match event.kind {
                    EventKind::TimerExpiry { generation } => {
                        if generation == bus.timer_generation {
                            return Step::Timer;
                        }
                        // Cancelled or re-armed since it was scheduled.
                    }
                    EventKind::ByteShifted => bus.complete_shift(),
                    EventKind::AckPulse => bus.ack_pending = true,
                }
                continue;
            }
            bus = self.shared.cond.wait(bus).unwrap();
        }
    }
}

/// Serial link handle of a [`SimBus`]
#[derive(Clone)]
pub struct SimSerial {
    shared: Arc<Shared>,
}

impl SerialLink for SimSerial {
    fn write_data(&self, byte: u8) {
        self.shared.update(|bus| {
            bus.data_out = byte;
            bus.status.remove(Status::TX_READY);
            bus.status.insert(Status::BUSY);
            bus.schedule(EventKind::ByteShifted, BYTE_TIME_US);
        });
    }

    fn read_data(&self) -> u8 {
        self.shared.update(|bus| {
            bus.status.remove(Status::RX_READY);
            bus.data_in
        })
    }

    fn tx_ready(&self) -> bool {
        self.shared.read(|bus| bus.status.contains(Status::TX_READY))
    }

    fn rx_ready(&self) -> bool {
        self.shared.read(|bus| bus.status.contains(Status::RX_READY))
    }

    fn busy(&self) -> bool {
        self.shared.read(|bus| bus.status.contains(Status::BUSY))
    }

    fn set_tx_irq(&self, enabled: bool) {
        self.shared.update(|bus| bus.tx_irq = enabled);
    }

    fn tx_irq_enabled(&self) -> bool {
        self.shared.read(|bus| bus.tx_irq)
    }

    fn set_rx_irq(&self, enabled: bool) {
        self.shared.update(|bus| bus.rx_irq = enabled);
    }

    fn select(&self) {
        self.shared.update(|bus| {
            bus.selected = true;
            bus.device.on_select();
            log::trace!("select asserted");
        });
    }

    fn deselect(&self) {
        self.shared.update(|bus| {
            if bus.status.contains(Status::BUSY) {
                bus.deselected_while_busy = true;
            }
            bus.selected = false;
            log::trace!("select released");
        });
    }
}

/// Acknowledge line handle of a [`SimBus`]
#[derive(Clone)]
pub struct SimAckLine {
    shared: Arc<Shared>,
}

impl AckLine for SimAckLine {
    fn set_irq(&self, enabled: bool) {
        self.shared.update(|bus| bus.ack_irq = enabled);
    }

    fn clear_pending(&self) {
        self.shared.update(|bus| bus.ack_pending = false);
    }
}

/// One-shot timer handle of a [`SimBus`]
#[derive(Clone)]
pub struct SimTimer {
    shared: Arc<Shared>,
}

impl OneShotTimer for SimTimer {
    fn arm(&self, micros: u32) {
        self.shared.update(|bus| {
            bus.timer_generation += 1;
            let generation = bus.timer_generation;
            bus.schedule(EventKind::TimerExpiry { generation }, u64::from(micros));
        });
    }

    fn cancel(&self) {
        self.shared.update(|bus| bus.timer_generation += 1);
    }
}

/// Device that replays a fixed response
///
/// Grants a fixed number of acknowledge pulses, then goes silent — the
/// way a real device marks the end of its response. Bytes past the end of
/// the scripted response read as 0xFF.
pub struct ScriptedDevice {
    responses: Vec<u8>,
    acks_granted: usize,
    ack_delay_us: u32,
    index: usize,
    acks_sent: usize,
}

impl ScriptedDevice {
    /// Create a device that responds with `responses` and acknowledges
    /// the first `acks_granted` bytes it exchanges
    pub fn new(responses: Vec<u8>, acks_granted: usize) -> Self {
        Self {
            responses,
            acks_granted,
            ack_delay_us: PAD_ACK_DELAY_US,
            index: 0,
            acks_sent: 0,
        }
    }

    /// Override the delay before each acknowledge pulse
    ///
    /// Delays at or beyond the engine's acknowledge timeout make the
    /// pulse arrive too late to count.
    pub fn with_ack_delay(mut self, micros: u32) -> Self {
        self.ack_delay_us = micros;
        self
    }
}

impl SimDevice for ScriptedDevice {
    fn on_select(&mut self) {
        self.index = 0;
        self.acks_sent = 0;
    }

    fn exchange(&mut self, _tx: u8) -> (u8, Option<u32>) {
        let response = self.responses.get(self.index).copied().unwrap_or(0xFF);
        self.index += 1;

        let ack = if self.acks_sent < self.acks_granted {
            self.acks_sent += 1;
            Some(self.ack_delay_us)
        } else {
            None
        };
        (response, ack)
    }
}

/// Button bit definitions for the digital pad
///
/// All buttons use active-low logic:
/// - 0 = button is pressed
/// - 1 = button is released
pub mod buttons {
    /// SELECT button (bit 0)
    pub const SELECT: u16 = 1 << 0;
    /// L3 button (left stick press) (bit 1)
    pub const L3: u16 = 1 << 1;
    /// R3 button (right stick press) (bit 2)
    pub const R3: u16 = 1 << 2;
    /// START button (bit 3)
    pub const START: u16 = 1 << 3;
    /// D-Pad UP (bit 4)
    pub const UP: u16 = 1 << 4;
    /// D-Pad RIGHT (bit 5)
    pub const RIGHT: u16 = 1 << 5;
    /// D-Pad DOWN (bit 6)
    pub const DOWN: u16 = 1 << 6;
    /// D-Pad LEFT (bit 7)
    pub const LEFT: u16 = 1 << 7;
    /// L2 shoulder button (bit 8)
    pub const L2: u16 = 1 << 8;
    /// R2 shoulder button (bit 9)
    pub const R2: u16 = 1 << 9;
    /// L1 shoulder button (bit 10)
    pub const L1: u16 = 1 << 10;
    /// R1 shoulder button (bit 11)
    pub const R1: u16 = 1 << 11;
    /// Triangle button (bit 12)
    pub const TRIANGLE: u16 = 1 << 12;
    /// Circle button (bit 13)
    pub const CIRCLE: u16 = 1 << 13;
    /// Cross (X) button (bit 14)
    pub const CROSS: u16 = 1 << 14;
    /// Square button (bit 15)
    pub const SQUARE: u16 = 1 << 15;
}

/// Standard digital pad on the remote end of the bus
///
/// Reply format:
/// - Byte 0: 0xFF (line idle while the command byte arrives)
/// - Byte 1: 0x41 (controller ID - digital pad)
/// - Byte 2: 0x5A (always 0x5A)
/// - Byte 3: button state low byte
/// - Byte 4: button state high byte
///
/// The pad acknowledges every byte of its reply except the last: silence
/// after byte 5 is how the master learns the response is over.
///
/// # Examples
///
/// ```
/// use padbus::sim::{buttons, DigitalPad};
///
/// let mut pad = DigitalPad::new();
/// pad.press_button(buttons::CROSS);
/// assert_eq!(pad.get_buttons() & buttons::CROSS, 0);
/// ```
#[derive(Debug, Clone)]
pub struct DigitalPad {
    /// Button state bitfield (active low: 0 = pressed, 1 = released)
    buttons: u16,

    /// Reply bytes prepared when the pad is selected
    reply: [u8; 5],

    /// Index of the next reply byte
    index: usize,
}

impl DigitalPad {
    /// Create a pad with all buttons released
    pub fn new() -> Self {
        Self {
            buttons: 0xFFFF, // All buttons released (active low)
            reply: [0xFF; 5],
            index: 0,
        }
    }

    /// Press a button (set bit to 0 for active-low)
    #[inline]
    pub fn press_button(&mut self, button: u16) {
        self.buttons &= !button;
    }

    /// Release a button (set bit to 1 for active-low)
    #[inline]
    pub fn release_button(&mut self, button: u16) {
        self.buttons |= button;
    }

    /// Set button state directly
    #[inline]
    pub fn set_button_state(&mut self, button: u16, pressed: bool) {
        if pressed {
            self.press_button(button);
        } else {
            self.release_button(button);
        }
    }

    /// Get current button state (active low)
    #[inline]
    pub fn get_buttons(&self) -> u16 {
        self.buttons
    }
}

impl SimDevice for DigitalPad {
    fn on_select(&mut self) {
        self.index = 0;
        self.reply = [
            0xFF,
            0x41, // Controller ID: digital pad
            0x5A, // Always 0x5A
            (self.buttons & 0xFF) as u8,
            ((self.buttons >> 8) & 0xFF) as u8,
        ];
        log::trace!("pad selected, buttons: 0x{:04X}", self.buttons);
    }

    fn exchange(&mut self, tx: u8) -> (u8, Option<u32>) {
        let response = if self.index < self.reply.len() {
            self.reply[self.index]
        } else {
            0xFF
        };
        self.index += 1;

        log::trace!("pad transfer: tx=0x{:02X} rx=0x{:02X}", tx, response);

        // No pulse after the last reply byte.
        let ack = if self.index < self.reply.len() {
            Some(PAD_ACK_DELAY_US)
        } else {
            None
        };
        (response, ack)
    }
}

impl Default for DigitalPad {
    fn default() -> Self {
        Self::new()
    }
}
