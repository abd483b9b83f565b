use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{ProbeError, Result};

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;
/// VarInts are never longer than 5 bytes.
const VARINT_MAX_BYTES: usize = 5;

/// Sequential reader over a borrowed byte buffer.
///
/// Every read either advances the offset by the number of bytes consumed
/// or fails without moving it. The offset never passes the end of the buffer.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Are there unread bytes left?
    pub fn remaining(&self) -> bool {
        self.offset < self.buf.len()
    }

    fn available(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// The next byte, without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.offset).copied()
    }

    /// Take `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.available() {
            return Err(ProbeError::OutOfBounds {
                needed: n,
                available: self.available(),
            });
        }
        let slice = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn i16_le(&mut self) -> Result<i16> {
        Ok(LittleEndian::read_i16(self.bytes(2)?))
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn i32_le(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.bytes(4)?))
    }

    pub fn u64_le(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    pub fn f32_le(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.bytes(4)?))
    }

    pub fn u16_be(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.bytes(2)?))
    }

    /// Raw bytes of a null-terminated string, terminator consumed.
    ///
    /// Yields an empty slice and leaves the offset alone if no terminator
    /// is left in the buffer.
    fn c_bytes(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.offset..];
        match rest.iter().position(|&b| b == 0x00) {
            Some(end) => {
                self.offset += end + 1;
                &rest[..end]
            }
            None => &[],
        }
    }

    /// Null-terminated UTF-8 string (Source engine style).
    ///
    /// Returns `""` when no terminator is found; this is not an error.
    pub fn c_string(&mut self) -> String {
        String::from_utf8_lossy(self.c_bytes()).into_owned()
    }

    /// Null-terminated latin-1 string, as spoken by GameSpy servers.
    pub fn c_string_latin1(&mut self) -> String {
        latin1(self.c_bytes())
    }

    /// Decode a [VarInt](https://wiki.vg/Protocol#VarInt_and_VarLong).
    pub fn varint(&mut self) -> Result<i32> {
        let start = self.offset;
        let mut result = 0u32;

        for i in 0..VARINT_MAX_BYTES {
            let byte = match self.u8() {
                Ok(byte) => byte,
                Err(err) => {
                    self.offset = start;
                    return Err(err);
                }
            };
            result |= ((byte & SEGMENT_BITS) as u32) << (i * 7);

            if byte & CONTINUE_BIT == 0 {
                return Ok(result as i32);
            }
        }

        self.offset = start;
        Err(ProbeError::VarIntTooLarge)
    }

    /// VarInt length-prefixed UTF-8 string.
    pub fn var_string(&mut self) -> Result<String> {
        let start = self.offset;
        let len = self.varint()?;
        if len < 0 {
            self.offset = start;
            return Err(ProbeError::ProtocolViolation(format!(
                "negative string length: {}",
                len
            )));
        }
        match self.bytes(len as usize) {
            Ok(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            Err(err) => {
                self.offset = start;
                Err(err)
            }
        }
    }
}

/// Decode latin-1 bytes; every byte maps to the code point of the same value.
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
