// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Length-prefixed NAL unit framing.
//!
//! Every NAL unit is preceded by a 4-byte big-endian count of the bytes
//! that follow it, header included. The count is back-patched once the
//! unit is complete.

use crate::header::*;

use bitstream_io::{BigEndian, BitWriter};

use std::io;

/// Appends one NAL unit to a buffer.
pub struct NalUnitWriter<'a> {
  out: &'a mut Vec<u8>,
  start: usize,
}

impl<'a> NalUnitWriter<'a> {
  /// Reserves the length field and writes the NAL unit header.
  ///
  /// # Errors
  ///
  /// Fails if the header fields are out of range.
  pub fn begin(
    out: &'a mut Vec<u8>, header: NalUnitHeader,
  ) -> io::Result<Self> {
    let start = out.len();
    out.extend_from_slice(&[0; NAL_LENGTH_BYTES]);
    BitWriter::endian(&mut *out, BigEndian).write_nal_unit_header(header)?;
    Ok(NalUnitWriter { out, start })
  }

  /// Absolute position of the next byte in the output buffer.
  pub fn position(&self) -> usize {
    self.out.len()
  }

  /// Bytes written after the length field, header included.
  pub fn len(&self) -> usize {
    self.out.len() - self.start - NAL_LENGTH_BYTES
  }

  pub fn extend(&mut self, bytes: &[u8]) {
    self.out.extend_from_slice(bytes);
  }

  /// Overwrites bytes already written to this unit.
  ///
  /// # Panics
  ///
  /// Panics if the range is not inside the unit body.
  pub fn overwrite(&mut self, pos: usize, bytes: &[u8]) {
    assert!(pos >= self.start + NAL_LENGTH_BYTES + NAL_HEADER_BYTES);
    self.out[pos..pos + bytes.len()].copy_from_slice(bytes);
  }

  /// Writes the length field and returns its value.
  pub fn finish(self) -> u32 {
    let len = self.len() as u32;
    self.out[self.start..self.start + NAL_LENGTH_BYTES]
      .copy_from_slice(&len.to_be_bytes());
    len
  }
}

/// Walks a buffer of length-prefixed NAL units.
///
/// Iteration stops at the end of the buffer or at the first truncated
/// unit; [`NalUnitIter::remainder`] tells them apart.
pub struct NalUnitIter<'a> {
  data: &'a [u8],
}

impl<'a> NalUnitIter<'a> {
  pub fn new(data: &'a [u8]) -> Self {
    NalUnitIter { data }
  }

  /// Bytes not consumed by the iteration so far.
  pub fn remainder(&self) -> &'a [u8] {
    self.data
  }
}

impl<'a> Iterator for NalUnitIter<'a> {
  type Item = &'a [u8];

  fn next(&mut self) -> Option<Self::Item> {
    if self.data.len() < NAL_LENGTH_BYTES {
      return None;
    }
    let (len, rest) = self.data.split_at(NAL_LENGTH_BYTES);
    let len = u32::from_be_bytes(len.try_into().ok()?) as usize;
    if rest.len() < len {
      return None;
    }
    let (unit, rest) = rest.split_at(len);
    self.data = rest;
    Some(unit)
  }
}
