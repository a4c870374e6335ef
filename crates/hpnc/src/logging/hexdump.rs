// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hex dump formatting for frame diagnostics.

use std::fmt::Write;

/// Format a byte slice as a classic 16-per-line hex dump with ASCII gutter.
///
/// Used by the `pn-hexdump` feature paths and the frame-drop diagnostics.
pub fn hexdump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", i * 16);
        for (j, b) in chunk.iter().enumerate() {
            if j == 8 {
                out.push(' ');
            }
            let _ = write!(out, "{:02x} ", b);
        }
        let missing = 16 - chunk.len();
        for _ in 0..missing {
            out.push_str("   ");
        }
        if chunk.len() <= 8 {
            out.push(' ');
        }
        out.push(' ');
        out.push('|');
        for b in chunk {
            if b.is_ascii_graphic() || *b == b' ' {
                out.push(*b as char);
            } else {
                out.push('.');
            }
        }
        out.push('|');
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexdump_shape() {
        let dump = hexdump(&[0x88, 0x92, 0x41, 0x42, 0x00]);
        assert!(dump.starts_with("00000000  88 92 41 42 00"));
        assert!(dump.contains("|..AB.|"));
        assert!(dump.ends_with('\n'));
    }

    #[test]
    fn test_hexdump_two_lines() {
        let bytes: Vec<u8> = (0u8..18).collect();
        let dump = hexdump(&bytes);
        assert_eq!(dump.lines().count(), 2);
        assert!(dump.lines().nth(1).expect("second line").starts_with("00000010"));
    }

    #[test]
    fn test_hexdump_empty() {
        assert_eq!(hexdump(&[]), "");
    }
}
