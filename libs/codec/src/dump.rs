//! Hex + ASCII rendering of raw frames for trace logs

use std::fmt::Write;

const BYTES_PER_LINE: usize = 16;

/// Render `bytes` as lines of `offset: hex |ascii|`, 16 bytes per line
///
/// ```text
/// 0000: 00 00 00 0a 43 6c 69 6e 49 44 00 00 00 07       |....ClinID....|
/// ```
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + 16);
    for (line, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        if line > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{:04x}:", line * BYTES_PER_LINE);
        let encoded = hex::encode(chunk);
        for pair in encoded.as_bytes().chunks(2) {
            out.push(' ');
            out.push(char::from(pair[0]));
            out.push(char::from(pair[1]));
        }
        for _ in chunk.len()..BYTES_PER_LINE {
            out.push_str("   ");
        }
        out.push_str("  |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                char::from(b)
            } else {
                '.'
            }
        }));
        out.push('|');
    }
    out
}
