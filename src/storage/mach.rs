//! Machine-independent byte encoding for page fields and redo payloads.
//!
//! Fixed-width fields are big-endian. Redo payloads use a prefix-compressed
//! form where the high bits of the first byte give the total length:
//!
//! ```text
//! 0xxxxxxx                       < 0x80        1 byte
//! 10xxxxxx xxxxxxxx              < 0x4000      2 bytes
//! 110xxxxx xxxxxxxx xxxxxxxx     < 0x200000    3 bytes
//! 1110xxxx + 3 bytes             < 0x10000000  4 bytes
//! 11110000 + 4 bytes             otherwise     5 bytes
//! ```
//!
//! Parsers return `None` when the buffer ends inside a value.

use byteorder::{BigEndian, ByteOrder};

pub fn read_1(buf: &[u8], offset: usize) -> u8 {
    buf[offset]
}

pub fn read_2(buf: &[u8], offset: usize) -> u16 {
    BigEndian::read_u16(&buf[offset..])
}

pub fn read_4(buf: &[u8], offset: usize) -> u32 {
    BigEndian::read_u32(&buf[offset..])
}

pub fn read_8(buf: &[u8], offset: usize) -> u64 {
    BigEndian::read_u64(&buf[offset..])
}

pub fn write_1(buf: &mut [u8], offset: usize, val: u8) {
    buf[offset] = val;
}

pub fn write_2(buf: &mut [u8], offset: usize, val: u16) {
    BigEndian::write_u16(&mut buf[offset..], val);
}

pub fn write_4(buf: &mut [u8], offset: usize, val: u32) {
    BigEndian::write_u32(&mut buf[offset..], val);
}

pub fn write_8(buf: &mut [u8], offset: usize, val: u64) {
    BigEndian::write_u64(&mut buf[offset..], val);
}

/// Number of bytes `val` takes in compressed form
pub fn compressed_size(val: u32) -> usize {
    match val {
        0..0x80 => 1,
        0x80..0x4000 => 2,
        0x4000..0x20_0000 => 3,
        0x20_0000..0x1000_0000 => 4,
        _ => 5,
    }
}

pub fn write_compressed(out: &mut Vec<u8>, val: u32) {
    match compressed_size(val) {
        1 => out.push(val as u8),
        2 => out.extend_from_slice(&((val | 0x8000) as u16).to_be_bytes()),
        3 => out.extend_from_slice(&(val | 0xC0_0000).to_be_bytes()[1..]),
        4 => out.extend_from_slice(&(val | 0xE000_0000).to_be_bytes()),
        _ => {
            out.push(0xF0);
            out.extend_from_slice(&val.to_be_bytes());
        }
    }
}

/// Parse a compressed u32. Returns the value and the number of bytes consumed.
pub fn parse_compressed(buf: &[u8]) -> Option<(u32, usize)> {
    let first = *buf.first()?;
    let len = match first {
        0x00..0x80 => 1,
        0x80..0xC0 => 2,
        0xC0..0xE0 => 3,
        0xE0..0xF0 => 4,
        _ => 5,
    };
    if buf.len() < len {
        return None;
    }

    let val = match len {
        1 => first as u32,
        2 => BigEndian::read_u16(buf) as u32 & 0x7FFF,
        3 => BigEndian::read_u24(buf) & 0x3F_FFFF,
        4 => BigEndian::read_u32(buf) & 0x1FFF_FFFF,
        _ => BigEndian::read_u32(&buf[1..]),
    };
    Some((val, len))
}

/// Wide integers: compressed high word followed by the raw low word
pub fn write_wide_compressed(out: &mut Vec<u8>, val: u64) {
    write_compressed(out, (val >> 32) as u32);
    out.extend_from_slice(&(val as u32).to_be_bytes());
}

pub fn parse_wide_compressed(buf: &[u8]) -> Option<(u64, usize)> {
    let (high, n) = parse_compressed(buf)?;
    if buf.len() < n + 4 {
        return None;
    }
    let low = BigEndian::read_u32(&buf[n..]);
    Some((((high as u64) << 32) | low as u64, n + 4))
}

/// Wide integers that are usually small (undo record numbers).
/// A zero high word is omitted; otherwise the value is prefixed with 0xFF.
pub fn write_much_compressed(out: &mut Vec<u8>, val: u64) {
    let high = (val >> 32) as u32;
    if high == 0 {
        write_compressed(out, val as u32);
        return;
    }
    out.push(0xFF);
    write_compressed(out, high);
    write_compressed(out, val as u32);
}

pub fn parse_much_compressed(buf: &[u8]) -> Option<(u64, usize)> {
    if *buf.first()? != 0xFF {
        return parse_compressed(buf).map(|(v, n)| (v as u64, n));
    }
    let (high, n1) = parse_compressed(&buf[1..])?;
    let (low, n2) = parse_compressed(&buf[1 + n1..])?;
    Some((((high as u64) << 32) | low as u64, 1 + n1 + n2))
}
