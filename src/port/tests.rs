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

//! Protocol engine tests against the simulated bus

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::DriverError;
use crate::port::{Port, Timings, ACK_TIMEOUT_US, ATTENTION_DELAY_US, BUFFER_CAPACITY};
use crate::sim::{
    buttons, DigitalPad, ScriptedDevice, SimAckLine, SimBus, SimDevice, SimSerial, SimTimer,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A port wired to a simulated bus with a running service thread
struct Rig {
    bus: SimBus,
    port: Arc<Port<SimSerial, SimAckLine, SimTimer>>,
    service: Option<JoinHandle<()>>,
}

impl Rig {
    fn new(device: Box<dyn SimDevice>) -> Self {
        Self::with_timings(device, Timings::default())
    }

    fn with_timings(device: Box<dyn SimDevice>, timings: Timings) -> Self {
        init_logs();
        let bus = SimBus::new(device);
        let port = Arc::new(Port::with_timings(
            bus.serial(),
            bus.ack_line(),
            bus.timer(),
            timings,
        ));
        let service = {
            let bus = bus.clone();
            let port = Arc::clone(&port);
            thread::spawn(move || bus.service(&port))
        };
        Self {
            bus,
            port,
            service: Some(service),
        }
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.bus.shutdown();
        if let Some(service) = self.service.take() {
            service.join().unwrap();
        }
    }
}

#[test]
fn test_idle_transfer_state() {
    let state = super::Transfer::idle();
    assert_eq!(state.phase, super::Phase::Idle);
    assert_eq!(state.position + state.remaining, state.len);
    assert!(state.armed.is_none());
}

#[test]
fn test_default_timings() {
    let timings = Timings::default();
    assert_eq!(timings.attention_delay_us, ATTENTION_DELAY_US);
    assert_eq!(timings.ack_timeout_us, ACK_TIMEOUT_US);
}

#[test]
fn test_full_exchange_returns_buffer_length() {
    let responses = vec![0xFF, 0x41, 0x5A, 0xBE, 0xEF];
    let rig = Rig::new(Box::new(ScriptedDevice::new(responses.clone(), 8)));

    let mut poll = [0x01, 0x42, 0x00, 0x00, 0x00];
    let exchanged = rig.port.send(&mut poll, false).unwrap();

    assert_eq!(exchanged, 5);
    assert_eq!(poll.to_vec(), responses);
    assert!(!rig.bus.deselected_while_busy());
}

#[test]
fn test_three_byte_poll_ends_after_missed_ack() {
    // The device paces byte 2 but never pulses again, so the exchange
    // ends by timeout after byte 2's receive completes.
    let rig = Rig::new(Box::new(ScriptedDevice::new(vec![0xFF, 0x41, 0x5A], 1)));

    let mut poll = [0x01, 0x42, 0x00];
    let exchanged = rig.port.send(&mut poll, false).unwrap();

    assert_eq!(exchanged, 2);
    assert_eq!(poll[0], 0xFF);
    assert_eq!(poll[1], 0x41);
    assert_eq!(poll[2], 0x00, "byte past the exchange must be untouched");
    assert!(!rig.bus.deselected_while_busy());
}

#[test]
fn test_single_byte_exchange_without_any_ack() {
    // No acknowledgement is awaited after the final requested byte, so a
    // device that never acknowledges still exchanges one byte.
    let rig = Rig::new(Box::new(ScriptedDevice::new(vec![0x73], 0)));

    let mut buffer = [0xFF];
    let exchanged = rig.port.send(&mut buffer, true).unwrap();

    assert_eq!(exchanged, 1);
    assert_eq!(buffer[0], 0x73);
}

#[test]
fn test_adaptive_length_flag_is_inert() {
    let responses = vec![0x10, 0x20, 0x30];
    for adaptive in [false, true] {
        let rig = Rig::new(Box::new(ScriptedDevice::new(responses.clone(), 8)));
        let mut buffer = [0x01, 0x42, 0x00];
        let exchanged = rig.port.send(&mut buffer, adaptive).unwrap();
        assert_eq!(exchanged, 3);
        assert_eq!(buffer.to_vec(), responses);
    }
}

#[test]
fn test_empty_buffer_exchanges_nothing() {
    let rig = Rig::new(Box::new(ScriptedDevice::new(vec![0x41], 8)));

    let mut buffer: [u8; 0] = [];
    let exchanged = rig.port.send(&mut buffer, false).unwrap();

    assert_eq!(exchanged, 0);
    assert!(!rig.port.in_progress());
}

#[test]
fn test_oversized_buffer_is_rejected() {
    let rig = Rig::new(Box::new(ScriptedDevice::new(vec![], 0)));

    let mut buffer = [0u8; BUFFER_CAPACITY + 1];
    let result = rig.port.send(&mut buffer, false);

    assert_eq!(
        result,
        Err(DriverError::BufferTooLong {
            len: BUFFER_CAPACITY + 1,
            capacity: BUFFER_CAPACITY,
        })
    );
}

#[test]
fn test_capacity_sized_buffer_is_accepted() {
    let responses: Vec<u8> = (0..BUFFER_CAPACITY as u8).collect();
    let rig = Rig::new(Box::new(ScriptedDevice::new(responses.clone(), 64)));

    let mut buffer = [0u8; BUFFER_CAPACITY];
    let exchanged = rig.port.send(&mut buffer, false).unwrap();

    assert_eq!(exchanged, BUFFER_CAPACITY);
    assert_eq!(buffer.to_vec(), responses);
}

#[test]
fn test_port_is_reusable_after_completion_and_timeout() {
    // One ack per selection: a 2-byte poll completes fully, a 4-byte poll
    // times out partway, and the port must come back clean each time.
    let rig = Rig::new(Box::new(ScriptedDevice::new(
        vec![0xAA, 0xBB, 0xCC, 0xDD],
        1,
    )));

    let mut first = [0x01, 0x42];
    assert_eq!(rig.port.send(&mut first, false).unwrap(), 2);
    assert_eq!(first, [0xAA, 0xBB]);

    let mut second = [0x01, 0x42, 0x00, 0x00];
    assert_eq!(rig.port.send(&mut second, false).unwrap(), 2);
    assert_eq!(&second[..2], &[0xAA, 0xBB]);
    assert_eq!(&second[2..], &[0x00, 0x00]);

    let mut third = [0x01, 0x42];
    assert_eq!(rig.port.send(&mut third, false).unwrap(), 2);
    assert_eq!(third, [0xAA, 0xBB]);

    assert!(!rig.port.in_progress());
    assert!(!rig.bus.deselected_while_busy());
}

#[test]
fn test_late_ack_is_ignored() {
    // Pulses arrive after the timeout window: each transfer ends after
    // its first byte, and the latched stale pulse must not leak into the
    // next transfer.
    let device = ScriptedDevice::new(vec![0x11, 0x22, 0x33], 8)
        .with_ack_delay(ACK_TIMEOUT_US + 50);
    let rig = Rig::new(Box::new(device));

    let mut first = [0x01, 0x42, 0x00];
    assert_eq!(rig.port.send(&mut first, false).unwrap(), 1);
    assert_eq!(first, [0x11, 0x42, 0x00]);

    let mut second = [0x01, 0x42, 0x00];
    assert_eq!(rig.port.send(&mut second, false).unwrap(), 1);
    assert_eq!(second, [0x11, 0x42, 0x00]);
}

#[test]
fn test_custom_timeout_shorter_than_ack_delay() {
    let timings = Timings {
        attention_delay_us: ATTENTION_DELAY_US,
        ack_timeout_us: 5,
    };
    let rig = Rig::with_timings(
        Box::new(ScriptedDevice::new(vec![0x11, 0x22], 8)),
        timings,
    );

    let mut buffer = [0x01, 0x42];
    assert_eq!(rig.port.send(&mut buffer, false).unwrap(), 1);
}

/// Device whose exchange stalls until the test releases it
struct StallDevice {
    gate: mpsc::Receiver<()>,
}

impl SimDevice for StallDevice {
    fn exchange(&mut self, _tx: u8) -> (u8, Option<u32>) {
        self.gate.recv().unwrap();
        (0x41, None)
    }
}

#[test]
fn test_overlapping_send_is_rejected() {
    let (release, gate) = mpsc::channel();
    let rig = Rig::new(Box::new(StallDevice { gate }));

    let blocked = {
        let port = Arc::clone(&rig.port);
        thread::spawn(move || {
            let mut buffer = [0x01];
            port.send(&mut buffer, false)
        })
    };

    while !rig.port.in_progress() {
        thread::sleep(Duration::from_millis(1));
    }

    let mut buffer = [0x01];
    assert_eq!(
        rig.port.send(&mut buffer, false),
        Err(DriverError::TransferInProgress)
    );

    release.send(()).unwrap();
    assert_eq!(blocked.join().unwrap(), Ok(1));
    assert!(!rig.port.in_progress());
}

#[test]
fn test_digital_pad_poll() {
    let mut pad = DigitalPad::new();
    pad.press_button(buttons::CROSS);
    pad.press_button(buttons::START);
    let state = pad.get_buttons();

    let rig = Rig::new(Box::new(pad));

    let mut poll = [0x01, 0x42, 0x00, 0x00, 0x00];
    let exchanged = rig.port.send(&mut poll, false).unwrap();

    assert_eq!(exchanged, 5);
    assert_eq!(poll[1], 0x41, "digital pad ID");
    assert_eq!(poll[2], 0x5A);
    assert_eq!(poll[3], (state & 0xFF) as u8);
    assert_eq!(poll[4], (state >> 8) as u8);
    assert!(!rig.bus.deselected_while_busy());
}

#[test]
fn test_digital_pad_oversized_poll_stops_at_reply_end() {
    // The pad goes silent after its fifth byte; an oversized poll ends
    // there by timeout instead of draining the whole buffer.
    let rig = Rig::new(Box::new(DigitalPad::new()));

    let mut poll = [0u8; 9];
    poll[0] = 0x01;
    poll[1] = 0x42;
    let exchanged = rig.port.send(&mut poll, true).unwrap();

    assert_eq!(exchanged, 5);
    assert!(poll[5..].iter().all(|&b| b == 0), "tail must be untouched");
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// A device that keeps acknowledging lets every requested byte
        /// through, and the caller sees exactly the device's response.
        #[test]
        fn full_exchange_for_every_length(
            responses in proptest::collection::vec(any::<u8>(), 1..=BUFFER_CAPACITY),
        ) {
            let len = responses.len();
            let rig = Rig::new(Box::new(ScriptedDevice::new(
                responses.clone(),
                BUFFER_CAPACITY,
            )));

            let mut buffer = vec![0u8; len];
            let exchanged = rig.port.send(&mut buffer, false).unwrap();

            prop_assert_eq!(exchanged, len);
            prop_assert_eq!(buffer, responses);
            prop_assert!(!rig.bus.deselected_while_busy());
        }

        /// A device that stops acknowledging after `acks` pulses
        /// terminates the exchange after byte `acks + 1`, leaving the
        /// rest of the caller's buffer untouched.
        #[test]
        fn missed_ack_truncates_exchange(
            (len, acks) in (2usize..=BUFFER_CAPACITY)
                .prop_flat_map(|len| (Just(len), 0..len - 1)),
        ) {
            let responses: Vec<u8> =
                (0..len as u8).map(|i| i.wrapping_mul(7) ^ 0x5A).collect();
            let rig = Rig::new(Box::new(ScriptedDevice::new(
                responses.clone(),
                acks,
            )));

            let mut buffer = vec![0xAA; len];
            let exchanged = rig.port.send(&mut buffer, false).unwrap();

            prop_assert_eq!(exchanged, acks + 1);
            prop_assert_eq!(&buffer[..exchanged], &responses[..exchanged]);
            prop_assert!(
                buffer[exchanged..].iter().all(|&b| b == 0xAA),
                "bytes past the exchange must be untouched"
            );
        }
    }
}
