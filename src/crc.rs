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

/// CRC-32 (ISO-HDLC, the zlib variant) of a frame body.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

pub fn is_valid(data: &[u8], expected: u32) -> bool {
    checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_single_bit_flips_detected() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let crc = checksum(&payload);
        assert!(is_valid(&payload, crc));

        for byte in [0usize, 17, 128, 255] {
            for bit in 0..8 {
                let mut corrupted = payload.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(!is_valid(&corrupted, crc), "flip at byte {} bit {} undetected", byte, bit);
            }
        }

        for bit in 0..32 {
            assert!(!is_valid(&payload, crc ^ (1 << bit)));
        }
    }
}
