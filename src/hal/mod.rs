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

//! Hardware abstraction for the controller port
//!
//! The protocol engine is generic over three small traits that the platform
//! bring-up code implements on top of its registers. Everything below this
//! boundary is one-time setup the driver does not own: clock enables, pin
//! multiplexing, serial clock polarity/phase/rate, one-shot timer mode and
//! rising-edge detection on the acknowledge input. After setup the engine
//! only needs to push bytes, flip interrupt enables and drive the select
//! line.
//!
//! All methods take `&self`: implementations are expected to be thin
//! wrappers over memory-mapped registers (or an interior-mutable
//! simulation, see [`crate::sim`]), and they are called from both the
//! submitting thread and interrupt context, hence the `Send + Sync` bound.

/// Synchronous serial shift register plus the select line of the same port
///
/// Models the JOY_TX_DATA/JOY_RX_DATA/JOY_STAT/JOY_CTRL register group:
/// a full-duplex shift register with separate "free to transmit" and
/// "byte received" flags, per-flag interrupt enables, and the DTR/select
/// output that addresses the remote device.
pub trait SerialLink: Send + Sync {
    /// Load a byte into the transmit shift register and start shifting.
    ///
    /// Must only be called while [`tx_ready`](Self::tx_ready) is set.
    fn write_data(&self, byte: u8);

    /// Take the received byte out of the receive register.
    ///
    /// Clears the [`rx_ready`](Self::rx_ready) flag.
    fn read_data(&self) -> u8;

    /// The shift register is free to accept outgoing data.
    fn tx_ready(&self) -> bool;

    /// A received byte is waiting in the receive register.
    fn rx_ready(&self) -> bool;

    /// Clock edges for the last byte are still being generated.
    ///
    /// The select line must not change state while this is set.
    fn busy(&self) -> bool;

    /// Enable or disable the transmit-ready interrupt source.
    fn set_tx_irq(&self, enabled: bool);

    /// Whether the transmit-ready interrupt source is currently enabled.
    fn tx_irq_enabled(&self) -> bool;

    /// Enable or disable the data-received interrupt source.
    fn set_rx_irq(&self, enabled: bool);

    /// Drive the select line low, addressing the remote device.
    fn select(&self);

    /// Drive the select line high, releasing the remote device.
    fn deselect(&self);
}

/// Rising-edge detector on the device's acknowledge line
///
/// The detector latches a pending indication when a pulse arrives, even
/// while its interrupt is disabled.
pub trait AckLine: Send + Sync {
    /// Enable or disable the edge interrupt.
    fn set_irq(&self, enabled: bool);

    /// Clear a latched pending edge.
    fn clear_pending(&self);
}

/// One-shot timer with interrupt on expiry
pub trait OneShotTimer: Send + Sync {
    /// Arm the timer to expire once after `micros` microseconds.
    ///
    /// Re-arming an already armed timer restarts it from zero; the
    /// superseded expiry must not fire. The implementation converts
    /// microseconds to its own tick rate.
    fn arm(&self, micros: u32);

    /// Cancel a pending expiry, if any.
    fn cancel(&self);
}
