// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::ec::ExpGolombWriter;
use crate::gop::SliceType;

use bitstream_io::{BigEndian, BitWrite, BitWriter};

use std::io;

/// Size of the big-endian length field in front of every NAL unit.
pub const NAL_LENGTH_BYTES: usize = 4;
/// Size of the NAL unit header.
pub const NAL_HEADER_BYTES: usize = 2;

/// Bits used for each entry point and for the CTU count in slice
/// headers. Both are written with a fixed width so that the patched
/// header has the same length as its placeholder.
const SLICE_PATCH_FIELD_BITS: u32 = 32;
const POC_LSB_BITS: u32 = 16;
const QP_BITS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum NalUnitType {
  NonIdr = 0,
  Idr = 1,
  Sps = 24,
  Pps = 25,
}

impl NalUnitType {
  pub fn for_slice(slice_type: SliceType) -> Self {
    if slice_type == SliceType::I {
      NalUnitType::Idr
    } else {
      NalUnitType::NonIdr
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnitHeader {
  pub nal_type: NalUnitType,
  pub temporal_id: u8,
}

impl NalUnitHeader {
  /// Parses the two header bytes of a NAL unit.
  pub fn parse(bytes: &[u8]) -> Option<Self> {
    use num_traits::FromPrimitive;

    let (b0, b1) = (*bytes.first()?, *bytes.get(1)?);
    if b0 & 0x80 != 0 {
      return None;
    }
    let type_plus1 = (b0 >> 1) & 0x3f;
    let nal_type = NalUnitType::from_u8(type_plus1.checked_sub(1)?)?;
    let temporal_id = ((b0 & 1) << 2) | (b1 >> 6);
    Some(NalUnitHeader { nal_type, temporal_id })
  }
}

/// Sequence-level parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceHeader {
  pub width: u32,
  pub height: u32,
  pub bit_depth: u8,
  pub chroma_format_idc: u8,
  pub ctu_size_log2: u8,
  pub gop_size: u32,
  pub hierarchical: bool,
  pub i_period: u32,
  pub max_refs: u8,
}

/// Picture-level parameters: tile layout and loop filter switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureParameterSet {
  pub tile_cols: u32,
  pub tile_rows: u32,
  pub uniform_spacing: bool,
  pub col_widths: Vec<u32>,
  pub row_heights: Vec<u32>,
  pub arbitrary_slices: bool,
  pub deblock: bool,
  pub cross_tile_deblock: bool,
  /// CTU rows of a single-tile picture are coded as substreams, each
  /// inheriting the entropy state of the row above after its second CTU.
  pub entropy_sync: bool,
  pub init_qp: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
  pub sps: SequenceHeader,
  pub pps: PictureParameterSet,
}

/// Slice header with the fields that depend on the payload.
///
/// `num_ctu` and `entry_points` hold placeholders until the committed
/// payload is known; [`SliceHeaderDraft::patched`] fills them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeaderDraft {
  pub slice_idx: u32,
  pub slice_type: SliceType,
  pub poc: u64,
  pub temporal_id: u8,
  pub ref_flag: bool,
  pub qp: u8,
  pub deblock: bool,
  pub tile_ids: Vec<u32>,
  pub num_ref_idx: [u8; 2],
  pub num_ctu: u32,
  /// Byte offset of every substream after the first, relative to the start
  /// of the slice payload.
  pub entry_points: Vec<u32>,
}

impl SliceHeaderDraft {
  /// Returns a copy with the payload-dependent fields filled in.
  pub fn patched(&self, num_ctu: u32, entry_points: &[u32]) -> Self {
    debug_assert_eq!(entry_points.len(), self.entry_points.len());
    SliceHeaderDraft {
      num_ctu,
      entry_points: entry_points.to_vec(),
      ..self.clone()
    }
  }
}

pub trait NalHeaderWriter {
  fn write_nal_unit_header(
    &mut self, header: NalUnitHeader,
  ) -> io::Result<()>;
}

impl<W: io::Write> NalHeaderWriter for BitWriter<W, BigEndian> {
  fn write_nal_unit_header(
    &mut self, header: NalUnitHeader,
  ) -> io::Result<()> {
    self.write_bit(false)?; // forbidden_zero_bit
    self.write(6, header.nal_type as u32 + 1)?;
    self.write(3, header.temporal_id)?;
    self.write(5, 0u8)?; // reserved
    self.write_bit(false)?; // extension flag
    Ok(())
  }
}

pub trait ParameterSetWriter {
  fn write_sequence_header(
    &mut self, sps: &SequenceHeader,
  ) -> io::Result<()>;
  fn write_picture_parameter_set(
    &mut self, pps: &PictureParameterSet,
  ) -> io::Result<()>;
  fn write_trailing_bits(&mut self) -> io::Result<()>;
}

impl<W: io::Write> ParameterSetWriter for BitWriter<W, BigEndian> {
  fn write_sequence_header(
    &mut self, sps: &SequenceHeader,
  ) -> io::Result<()> {
    self.write_ue(0)?; // sps_id
    self.write(16, sps.width)?;
    self.write(16, sps.height)?;
    self.write_ue(u32::from(sps.bit_depth) - 8)?;
    self.write_ue(u32::from(sps.chroma_format_idc))?;
    self.write_ue(u32::from(sps.ctu_size_log2) - 5)?;
    self.write_ue(sps.gop_size.trailing_zeros())?;
    self.write_bit(sps.hierarchical)?;
    self.write_ue(sps.i_period)?;
    self.write_ue(u32::from(sps.max_refs))?;
    self.write_trailing_bits()
  }

  fn write_picture_parameter_set(
    &mut self, pps: &PictureParameterSet,
  ) -> io::Result<()> {
    self.write_ue(0)?; // pps_id
    self.write_ue(0)?; // sps_id
    self.write_ue(pps.tile_cols - 1)?;
    self.write_ue(pps.tile_rows - 1)?;
    self.write_bit(pps.uniform_spacing)?;
    if !pps.uniform_spacing {
      // the last column and row are implied
      for &w in pps.col_widths.iter().take(pps.col_widths.len() - 1) {
        self.write_ue(w - 1)?;
      }
      for &h in pps.row_heights.iter().take(pps.row_heights.len() - 1) {
        self.write_ue(h - 1)?;
      }
    }
    self.write_bit(pps.arbitrary_slices)?;
    self.write_bit(pps.deblock)?;
    self.write_bit(pps.cross_tile_deblock)?;
    self.write_bit(pps.entropy_sync)?;
    self.write(QP_BITS, pps.init_qp)?;
    self.write_trailing_bits()
  }

  fn write_trailing_bits(&mut self) -> io::Result<()> {
    self.write_bit(true)?;
    self.byte_align()
  }
}

pub trait SliceHeaderWriter {
  fn write_slice_header(
    &mut self, draft: &SliceHeaderDraft,
  ) -> io::Result<()>;
}

impl<W: io::Write> SliceHeaderWriter for BitWriter<W, BigEndian> {
  fn write_slice_header(
    &mut self, draft: &SliceHeaderDraft,
  ) -> io::Result<()> {
    self.write_ue(0)?; // pps_id
    self.write_ue(draft.slice_idx)?;
    self.write(2, draft.slice_type.code())?;
    self.write(POC_LSB_BITS, (draft.poc & 0xffff) as u32)?;
    self.write_bit(draft.ref_flag)?;
    self.write_ue(draft.tile_ids.len() as u32)?;
    for &id in &draft.tile_ids {
      self.write_ue(id)?;
    }
    if draft.slice_type != SliceType::I {
      self.write_ue(u32::from(draft.num_ref_idx[0]))?;
      if draft.slice_type == SliceType::B {
        self.write_ue(u32::from(draft.num_ref_idx[1]))?;
      }
    }
    self.write(QP_BITS, draft.qp)?;
    self.write_bit(draft.deblock)?;
    self.write_ue(draft.entry_points.len() as u32)?;
    self.write(SLICE_PATCH_FIELD_BITS, draft.num_ctu)?;
    for &offset in &draft.entry_points {
      self.write(SLICE_PATCH_FIELD_BITS, offset)?;
    }
    self.write_bit(true)?;
    self.byte_align()
  }
}

/// Serializes a slice header on its own, byte aligned.
///
/// # Errors
///
/// Fails if a field does not fit its syntax element.
pub fn slice_header_bytes(draft: &SliceHeaderDraft) -> io::Result<Vec<u8>> {
  let mut bw = BitWriter::endian(Vec::new(), BigEndian);
  bw.write_slice_header(draft)?;
  Ok(bw.into_writer())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn draft(tiles: u32) -> SliceHeaderDraft {
    SliceHeaderDraft {
      slice_idx: 1,
      slice_type: SliceType::B,
      poc: 70_000,
      temporal_id: 2,
      ref_flag: true,
      qp: 32,
      deblock: true,
      tile_ids: (0..tiles).collect(),
      num_ref_idx: [2, 1],
      num_ctu: 0,
      entry_points: vec![0; tiles as usize - 1],
    }
  }

  #[test]
  fn nal_header_round_trip() {
    let mut bw = BitWriter::endian(Vec::new(), BigEndian);
    let header = NalUnitHeader { nal_type: NalUnitType::Pps, temporal_id: 5 };
    bw.write_nal_unit_header(header).unwrap();
    let bytes = bw.into_writer();
    assert_eq!(bytes.len(), NAL_HEADER_BYTES);
    assert_eq!(NalUnitHeader::parse(&bytes), Some(header));
  }

  #[test]
  fn forbidden_bit_rejected() {
    assert_eq!(NalUnitHeader::parse(&[0x80, 0]), None);
    assert_eq!(NalUnitHeader::parse(&[0x02]), None);
  }

  #[test]
  fn patched_header_keeps_length() {
    let template = draft(4);
    let before = slice_header_bytes(&template).unwrap();
    let patched = template.patched(1234, &[17, 400_000, 9]);
    let after = slice_header_bytes(&patched).unwrap();
    assert_eq!(before.len(), after.len());
    assert_ne!(before, after);
  }

  #[test]
  fn patched_fields_are_written_in_full() {
    let patched = draft(2).patched(0x0102_0304, &[0x0a0b_0c0d]);
    let bytes = slice_header_bytes(&patched).unwrap();
    let bits: String = bytes.iter().map(|b| format!("{b:08b}")).collect();
    // ue(1) entry count, num_ctu, one entry point, stop bit
    let fields =
      format!("010{:032b}{:032b}1", 0x0102_0304u32, 0x0a0b_0c0du32);
    let at = bits.rfind(&fields).unwrap();
    assert!(bits[at + fields.len()..].bytes().all(|b| b == b'0'));
  }

  #[test]
  fn uniform_pps_omits_sizes() {
    let mut pps = PictureParameterSet {
      tile_cols: 2,
      tile_rows: 2,
      uniform_spacing: true,
      col_widths: vec![3, 4],
      row_heights: vec![2, 2],
      arbitrary_slices: false,
      deblock: true,
      cross_tile_deblock: false,
      entropy_sync: false,
      init_qp: 30,
    };
    let mut bw = BitWriter::endian(Vec::new(), BigEndian);
    bw.write_picture_parameter_set(&pps).unwrap();
    let uniform = bw.into_writer();

    pps.uniform_spacing = false;
    let mut bw = BitWriter::endian(Vec::new(), BigEndian);
    bw.write_picture_parameter_set(&pps).unwrap();
    let explicit = bw.into_writer();
    assert!(explicit.len() >= uniform.len());
  }
}
