// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Bit-level output cursor shared by the entropy coder, the slice header
//! writer and the emitter.

use bitstream_io::{BigEndian, BitWrite, BitWriter};

use std::io;

/// Exp-Golomb codes on top of a `bitstream-io` writer.
pub trait ExpGolombWriter {
  /// Writes `value` as an unsigned Exp-Golomb code, `ue(v)`.
  fn write_ue(&mut self, value: u32) -> io::Result<u32>;
  /// Writes `value` as a signed Exp-Golomb code, `se(v)`.
  fn write_se(&mut self, value: i32) -> io::Result<u32>;
}

impl<W: io::Write> ExpGolombWriter for BitWriter<W, BigEndian> {
  /// Returns the number of bits written.
  fn write_ue(&mut self, value: u32) -> io::Result<u32> {
    let v = u64::from(value) + 1;
    let len = 64 - v.leading_zeros();
    if len > 1 {
      self.write(len - 1, 0u32)?;
    }
    self.write(len, v)?;
    Ok(2 * len - 1)
  }

  fn write_se(&mut self, value: i32) -> io::Result<u32> {
    let mapped = if value > 0 {
      2 * value.unsigned_abs() - 1
    } else {
      2 * value.unsigned_abs()
    };
    self.write_ue(mapped)
  }
}

/// Byte-oriented bit writer that keeps track of its position.
pub struct BitCursor {
  bw: BitWriter<Vec<u8>, BigEndian>,
  bits: u64,
}

impl Default for BitCursor {
  fn default() -> Self {
    BitCursor::new()
  }
}

impl BitCursor {
  pub fn new() -> Self {
    BitCursor::with_capacity(0)
  }

  /// Creates a cursor whose buffer can hold `bytes` without
  /// reallocating.
  pub fn with_capacity(bytes: usize) -> Self {
    BitCursor {
      bw: BitWriter::endian(Vec::with_capacity(bytes), BigEndian),
      bits: 0,
    }
  }

  /// Writes the `bits` low bits of `value`, most significant first.
  ///
  /// # Errors
  ///
  /// Fails if `value` does not fit in `bits` bits.
  pub fn write(&mut self, bits: u32, value: u32) -> io::Result<()> {
    if bits > 0 {
      self.bw.write(bits, value)?;
      self.bits += u64::from(bits);
    }
    Ok(())
  }

  pub fn write_bit(&mut self, bit: bool) -> io::Result<()> {
    self.bw.write_bit(bit)?;
    self.bits += 1;
    Ok(())
  }

  pub fn write_ue(&mut self, value: u32) -> io::Result<()> {
    self.bits += u64::from(self.bw.write_ue(value)?);
    Ok(())
  }

  pub fn write_se(&mut self, value: i32) -> io::Result<()> {
    self.bits += u64::from(self.bw.write_se(value)?);
    Ok(())
  }

  /// Pads with zero bits up to the next byte boundary.
  pub fn byte_align(&mut self) -> io::Result<()> {
    self.bits += (8 - self.bits % 8) % 8;
    self.bw.byte_align()
  }

  /// Appends whole bytes. The cursor must be byte aligned.
  pub fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
    debug_assert!(self.is_aligned());
    self.bw.write_bytes(bytes)?;
    self.bits += 8 * bytes.len() as u64;
    Ok(())
  }

  pub const fn is_aligned(&self) -> bool {
    self.bits % 8 == 0
  }

  /// Number of bits written so far.
  pub const fn bit_pos(&self) -> u64 {
    self.bits
  }

  /// Number of bytes the written bits occupy, counting a partial byte.
  pub const fn byte_len(&self) -> usize {
    ((self.bits + 7) / 8) as usize
  }

  /// Discards everything written so far.
  pub fn reset(&mut self) {
    *self = BitCursor::new();
  }

  /// Aligns the cursor and returns the written bytes.
  ///
  /// # Errors
  ///
  /// Propagates errors from the underlying writer.
  pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
    self.byte_align()?;
    Ok(self.bw.into_writer())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn exp_golomb_codes() {
    let mut c = BitCursor::new();
    // 1, 010, 011, 00100
    c.write_ue(0).unwrap();
    c.write_ue(1).unwrap();
    c.write_ue(2).unwrap();
    c.write_ue(3).unwrap();
    assert_eq!(c.bit_pos(), 12);
    assert_eq!(c.into_bytes().unwrap(), [0b1010_0110, 0b0100_0000]);
  }

  #[test]
  fn signed_mapping() {
    let mut c = BitCursor::new();
    // se(1) = ue(1), se(-1) = ue(2)
    c.write_se(1).unwrap();
    c.write_se(-1).unwrap();
    c.write_se(0).unwrap();
    assert_eq!(c.bit_pos(), 7);
    assert_eq!(c.into_bytes().unwrap(), [0b0100_1110]);
  }

  #[test]
  fn alignment_is_tracked() {
    let mut c = BitCursor::new();
    c.write(3, 0b101).unwrap();
    assert!(!c.is_aligned());
    assert_eq!(c.byte_len(), 1);
    c.byte_align().unwrap();
    assert_eq!(c.bit_pos(), 8);
    c.write_bytes(&[0xAB, 0xCD]).unwrap();
    assert_eq!(c.byte_len(), 3);
    assert_eq!(c.into_bytes().unwrap(), [0b1010_0000, 0xAB, 0xCD]);
  }

  #[test]
  fn oversized_value_is_rejected() {
    let mut c = BitCursor::new();
    assert!(c.write(2, 7).is_err());
  }
}
