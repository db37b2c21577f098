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

//! DISKDUMP wire protocol constants and fixed frames

use std::fmt;

/// Magic token opening both the header and the footer frame
pub const MAGIC: &[u8; 8] = b"DISKDUMP";

/// Acknowledge - frame accepted
pub const ACK: u8 = 0x55;

/// Negative acknowledge - CRC mismatch, peer resends the same frame
pub const NACK: u8 = 0xAA;

/// Abort - session is over, peer stops transmitting
pub const ABRT: u8 = 0xCC;

/// Attempts allowed for one CRC protected frame before aborting
pub const MAX_RETRIES: u32 = 3;

/// Rate the peer uses for the header frame
pub const DEFAULT_BAUD_RATE: u32 = 1200;

/// Magic plus one selector byte
pub const MAGIC_FRAME_LEN: usize = MAGIC.len() + 1;

/// u32 cylinders, u32 heads, u32 sectors per track, u16 sector size, u32 sectors
pub const DISK_INFO_LEN: usize = 18;

/// Largest payload the peer emits: 128 sectors of the largest sector size
pub const MAX_PAYLOAD_LEN: u32 = 128 * u16::MAX as u32;

/// Speed selector to baud rate table, indexed by selector
const SPEEDS: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

pub fn baud_rate_for(selector: u8) -> Option<u32> {
    SPEEDS.get(selector as usize).copied()
}

/// Splits a header or footer frame into its magic and selector byte.
pub fn split_magic_frame(frame: &[u8; MAGIC_FRAME_LEN]) -> (&[u8], u8) {
    (&frame[..MAGIC.len()], frame[MAGIC.len()])
}

/// Human readable name for a control byte, used in debug traces.
pub fn control_name(byte: u8) -> &'static str {
    match byte {
        ACK => "ACK",
        NACK => "NACK",
        ABRT => "ABRT",
        _ => "?",
    }
}

// ============================================================================
// Disk geometry
// ============================================================================

/// Geometry of the disk being dumped, as announced by the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskInfo {
    pub num_cylinders: u32,
    pub num_heads: u32,
    pub sectors_per_track: u32,
    pub sector_size: u16,
    pub num_sectors: u32,
}

impl DiskInfo {
    pub fn decode(raw: &[u8; DISK_INFO_LEN]) -> Self {
        let u32_at = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);

        DiskInfo {
            num_cylinders: u32_at(0),
            num_heads: u32_at(4),
            sectors_per_track: u32_at(8),
            sector_size: u16::from_le_bytes([raw[12], raw[13]]),
            num_sectors: u32_at(14),
        }
    }

    /// Total payload bytes the peer will send.
    pub fn image_size(&self) -> u64 {
        self.sector_size as u64 * self.num_sectors as u64
    }
}

impl fmt::Display for DiskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== DISK INFO ==")?;
        writeln!(f, "Cylinders:\t\t {}", self.num_cylinders)?;
        writeln!(f, "Heads:\t\t\t {}", self.num_heads)?;
        writeln!(f, "Sectors per Track:\t {}", self.sectors_per_track)?;
        writeln!(f, "Sector size:\t\t {}", self.sector_size)?;
        write!(f, "Total Sectors:\t\t {}", self.num_sectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_table() {
        assert_eq!(baud_rate_for(0), Some(1200));
        assert_eq!(baud_rate_for(3), Some(9600));
        assert_eq!(baud_rate_for(7), Some(115200));
        assert_eq!(baud_rate_for(8), None);
        assert_eq!(baud_rate_for(0xFF), None);
    }

    #[test]
    fn test_decode_floppy_geometry() {
        let mut raw = [0u8; DISK_INFO_LEN];
        raw[0..4].copy_from_slice(&80u32.to_le_bytes());
        raw[4..8].copy_from_slice(&2u32.to_le_bytes());
        raw[8..12].copy_from_slice(&18u32.to_le_bytes());
        raw[12..14].copy_from_slice(&512u16.to_le_bytes());
        raw[14..18].copy_from_slice(&2880u32.to_le_bytes());

        let info = DiskInfo::decode(&raw);
        assert_eq!(info, DiskInfo {
            num_cylinders: 80,
            num_heads: 2,
            sectors_per_track: 18,
            sector_size: 512,
            num_sectors: 2880,
        });
        assert_eq!(info.image_size(), 1_474_560);
    }

    #[test]
    fn test_image_size_does_not_overflow() {
        let info = DiskInfo {
            sector_size: u16::MAX,
            num_sectors: u32::MAX,
            ..Default::default()
        };
        assert_eq!(info.image_size(), u16::MAX as u64 * u32::MAX as u64);
    }

    #[test]
    fn test_split_magic_frame() {
        let frame = *b"DISKDUMP\x03";
        let (magic, selector) = split_magic_frame(&frame);
        assert_eq!(magic, MAGIC);
        assert_eq!(selector, 3);
    }
}
