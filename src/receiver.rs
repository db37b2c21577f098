// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use crate::crc;
use crate::hash::HashAlgorithm;
use crate::image::ImageWriter;
use crate::protocol::*;
use crate::reporter::Reporter;
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Invalid {frame} magic: {found:?}")]
    InvalidMagic { frame: &'static str, found: String },

    #[error("Invalid speed requested: {0}")]
    UnknownSpeed(u8),

    #[error("Invalid hash requested: {0}")]
    UnknownHash(u8),

    #[error("Packet index mismatch. Expected {expected} got {received}")]
    PacketIndexMismatch { expected: u32, received: u32 },

    #[error("Packet {index} carries {length} bytes but only {remaining} bytes remain")]
    PayloadOverrun { index: u32, length: u32, remaining: u64 },

    #[error("No more retries left for packet {index}")]
    PacketRetriesExhausted { index: u32 },

    #[error("No more retries left for hash message")]
    HashRetriesExhausted,

    #[error("Image does not match {algorithm} {expected}")]
    VerificationFailed { algorithm: &'static str, expected: String },

    #[error("Transfer complete")]
    TransferComplete,
}

impl ReceiverError {
    /// The image was fully written but its digest did not match.
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, ReceiverError::VerificationFailed { .. })
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Deadline for receiving one complete field or frame
    pub read_timeout: Duration,
    /// Pause with the port closed while the peer switches speed
    pub switch_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            read_timeout: Duration::from_secs(10),
            switch_delay: Duration::from_secs(3),
        }
    }
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitHeader;
pub struct SpeedSwitch;
pub struct DiskInfoExchange;
pub struct DataTransfer;
pub struct AwaitFooter;
pub struct Verify;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    reporter: Box<dyn Reporter>,
    config: SessionConfig,
    output_path: PathBuf,
    image: Option<ImageWriter>,
    baud_rate: u32,
    disk_info: DiskInfo,
    remaining: u64,
    packet_index: u32,
    hash: HashAlgorithm,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError>;
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            serial: self.serial,
            reporter: self.reporter,
            config: self.config,
            output_path: self.output_path,
            image: self.image,
            baud_rate: self.baud_rate,
            disk_info: self.disk_info,
            remaining: self.remaining,
            packet_index: self.packet_index,
            hash: self.hash,
        })
    }

    fn io_error(&self, e: std::io::Error) -> ReceiverError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        ReceiverError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn send(&mut self, byte: u8) -> Result<(), ReceiverError> {
        if let Err(e) = self.serial.write_all(&[byte]) {
            return Err(self.io_error(e));
        }
        debug!("Sent: {}", control_name(byte));
        Ok(())
    }

    /// Tells the peer to stop and hands back the error that ends the session.
    fn abort(&mut self, err: ReceiverError) -> ReceiverError {
        self.reporter.error(&err.to_string());
        match self.serial.write_all(&[ABRT]) {
            Ok(()) => debug!("Sent: ABRT"),
            Err(e) => debug!("Failed to send ABRT: {}", e),
        }
        err
    }

    fn read_frame<const N: usize>(&mut self) -> Result<[u8; N], ReceiverError> {
        let mut buf = [0u8; N];
        let timeout = self.config.read_timeout;
        match self.serial.read_exact_timeout(&mut buf, timeout) {
            Ok(()) => Ok(buf),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn read_u32(&mut self) -> Result<u32, ReceiverError> {
        self.read_frame::<4>().map(u32::from_le_bytes)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, ReceiverError> {
        let mut buf = vec![0u8; len];
        let timeout = self.config.read_timeout;
        match self.serial.read_exact_timeout(&mut buf, timeout) {
            Ok(()) => Ok(buf),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<AwaitHeader> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        // Nothing heard yet means the peer has not started; keep listening.
        let mut first = [0u8; 1];
        match fsm.serial.read_timeout(&mut first, fsm.config.read_timeout) {
            Ok(n) if n > 0 => {}
            Err(e) if e.kind() != std::io::ErrorKind::TimedOut => return Err(fsm.io_error(e)),
            _ => {
                debug!("Peer not ready, still waiting for header");
                return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
            }
        }

        let rest: [u8; MAGIC_FRAME_LEN - 1] = fsm.read_frame()?;
        let mut frame = [0u8; MAGIC_FRAME_LEN];
        frame[0] = first[0];
        frame[1..].copy_from_slice(&rest);

        let (magic, selector) = split_magic_frame(&frame);
        if magic != MAGIC {
            let found = String::from_utf8_lossy(magic).into_owned();
            return Err(fsm.abort(ReceiverError::InvalidMagic { frame: "header", found }));
        }
        debug!("Received: header, speed selector {}", selector);

        let Some(baud_rate) = baud_rate_for(selector) else {
            return Err(fsm.abort(ReceiverError::UnknownSpeed(selector)));
        };

        fsm.baud_rate = baud_rate;
        let next = fsm.transition::<SpeedSwitch>();
        Ok(next as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<SpeedSwitch> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        fsm.reporter.info(&format!("Changing to speed: {} bps", fsm.baud_rate));

        // The old handle is gone before the peer reprograms its UART.
        fsm.serial.close();
        std::thread::sleep(fsm.config.switch_delay);
        if let Err(e) = fsm.serial.open(fsm.baud_rate) {
            return Err(fsm.io_error(e));
        }

        fsm.send(ACK)?;

        let next = fsm.transition::<DiskInfoExchange>();
        Ok(next as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<DiskInfoExchange> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        // This frame carries no CRC on the wire.
        let raw: [u8; DISK_INFO_LEN] = fsm.read_frame()?;
        fsm.disk_info = DiskInfo::decode(&raw);
        debug!("Received: disk info {:?}", fsm.disk_info);

        fsm.send(ACK)?;

        fsm.reporter.info(&fsm.disk_info.to_string());
        fsm.remaining = fsm.disk_info.image_size();
        fsm.packet_index = 0;

        let next = fsm.transition::<DataTransfer>();
        Ok(next as Box<dyn ReceiverState>)
    }
}

impl ReceiverFsm<DataTransfer> {
    fn open_image(&mut self) -> Result<(), ReceiverError> {
        self.reporter.info(&format!("Dumping data to {}", self.output_path.display()));
        match ImageWriter::create(&self.output_path) {
            Ok(image) => {
                self.image = Some(image);
                self.reporter.info(&format!("Receiving data for disk with length {} bytes", self.remaining));
                self.reporter.begin_transfer(self.remaining);
                Ok(())
            }
            Err(e) => {
                let err = self.io_error(e);
                Err(self.abort(err))
            }
        }
    }

    fn append_payload(&mut self, payload: &[u8]) -> Result<(), ReceiverError> {
        let result = match self.image.as_mut() {
            Some(image) => image.append(payload),
            None => Ok(()),
        };
        if let Err(e) = result {
            let err = self.io_error(e);
            return Err(self.abort(err));
        }
        Ok(())
    }

    fn close_image(&mut self) -> Result<(), ReceiverError> {
        self.reporter.end_transfer();
        if let Some(image) = self.image.take() {
            debug!("Closing {} at {} bytes", image.path().display(), image.written());
            if let Err(e) = image.finish() {
                return Err(self.io_error(e));
            }
        }
        Ok(())
    }
}

impl ReceiverState for ReceiverFsm<DataTransfer> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        if fsm.image.is_none() {
            fsm.open_image()?;
        }

        if fsm.remaining == 0 {
            fsm.close_image()?;
            fsm.reporter.info("Data transfer finished");
            let next = fsm.transition::<AwaitFooter>();
            return Ok(next as Box<dyn ReceiverState>);
        }

        let index = fsm.packet_index;
        let mut retries_left = MAX_RETRIES;

        loop {
            let received = fsm.read_u32()?;
            if received != index {
                return Err(fsm.abort(ReceiverError::PacketIndexMismatch { expected: index, received }));
            }

            let length = fsm.read_u32()?;
            // Also bounds the allocation for a length field corrupted in transit.
            if length as u64 > fsm.remaining || length > MAX_PAYLOAD_LEN {
                let remaining = fsm.remaining;
                return Err(fsm.abort(ReceiverError::PayloadOverrun { index, length, remaining }));
            }

            let payload = fsm.read_bytes(length as usize)?;
            let packet_crc = fsm.read_u32()?;

            if crc::is_valid(&payload, packet_crc) {
                debug!("Received: packet {} ({} bytes)", index, length);

                fsm.append_payload(&payload)?;
                fsm.send(ACK)?;

                fsm.remaining -= length as u64;
                fsm.packet_index += 1;
                fsm.reporter.advance(length as u64);

                return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
            }

            fsm.reporter.error(&format!("CRC mismatch for packet {}", index));
            fsm.send(NACK)?;

            retries_left -= 1;
            if retries_left == 0 {
                return Err(fsm.abort(ReceiverError::PacketRetriesExhausted { index }));
            }
        }
    }
}

impl ReceiverState for ReceiverFsm<AwaitFooter> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let frame: [u8; MAGIC_FRAME_LEN] = fsm.read_frame()?;
        let (magic, selector) = split_magic_frame(&frame);
        if magic != MAGIC {
            let found = String::from_utf8_lossy(magic).into_owned();
            return Err(fsm.abort(ReceiverError::InvalidMagic { frame: "footer", found }));
        }
        debug!("Received: footer, hash selector {}", selector);

        let Some(hash) = HashAlgorithm::from_selector(selector) else {
            return Err(fsm.abort(ReceiverError::UnknownHash(selector)));
        };

        fsm.send(ACK)?;
        fsm.hash = hash;

        let next = fsm.transition::<Verify>();
        Ok(next as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<Verify> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let digest_len = fsm.hash.digest_len();
        let mut retries_left = MAX_RETRIES;

        let digest = loop {
            let digest = fsm.read_bytes(digest_len)?;
            let message_crc = fsm.read_u32()?;
            if crc::is_valid(&digest, message_crc) {
                break digest;
            }

            fsm.reporter.error("Hash message contains invalid CRC");
            fsm.send(NACK)?;

            retries_left -= 1;
            if retries_left == 0 {
                return Err(fsm.abort(ReceiverError::HashRetriesExhausted));
            }
        };

        let expected = String::from_utf8_lossy(&digest).into_owned();
        match fsm.hash {
            HashAlgorithm::None => fsm.reporter.info("No hash provided"),
            hash => fsm.reporter.info(&format!("Hash is {} = {}", hash.name(), expected)),
        }

        match fsm.hash.verify(&fsm.output_path, &expected) {
            Ok(true) => {
                fsm.reporter.info("Image verified");
                Err(ReceiverError::TransferComplete)
            }
            Ok(false) => {
                let err = ReceiverError::VerificationFailed { algorithm: fsm.hash.name(), expected };
                fsm.reporter.error(&err.to_string());
                Err(err)
            }
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl ReceiverFsm<AwaitHeader> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        reporter: Box<dyn Reporter>,
        output_path: PathBuf,
        config: SessionConfig,
    ) -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<AwaitHeader>,
            serial,
            reporter,
            config,
            output_path,
            image: None,
            baud_rate: DEFAULT_BAUD_RATE,
            disk_info: DiskInfo::default(),
            remaining: 0,
            packet_index: 0,
            hash: HashAlgorithm::None,
        })
    }
}

/// Steps the machine until the session ends. The transport is dropped
/// (and therefore closed) on every exit path.
pub fn run(mut fsm: Box<dyn ReceiverState>) -> Result<(), ReceiverError> {
    loop {
        match fsm.step() {
            Ok(next) => fsm = next,
            Err(ReceiverError::TransferComplete) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
