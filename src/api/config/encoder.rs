// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use itertools::*;

use crate::gop::{GopConfig, SliceType};
use crate::util::ChromaSampling;

use std::fmt;

/// Largest supported picture dimension.
pub(crate) const MAX_DIMENSION: usize = u16::MAX as usize;
/// Highest QP value.
pub(crate) const MAX_QP: u8 = 51;
/// Upper bound on the number of reference pictures per list.
pub const MAX_REFS: usize = 4;

/// Encoder settings which impact the produced bitstream.
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderConfig {
  // output size
  /// Width of the frames in pixels.
  pub width: usize,
  /// Height of the frames in pixels.
  pub height: usize,

  /// Bit depth.
  pub bit_depth: usize,
  /// Chroma subsampling.
  pub chroma_sampling: ChromaSampling,

  /// CTU size in luma samples: 32, 64 or 128.
  pub ctu_size: usize,

  // GOP structure
  /// Pictures per GOP: 1 for low delay, else 2, 4, 8 or 16.
  pub gop_size: usize,
  /// Distance between intra pictures. 0 codes only the first picture as
  /// intra.
  pub i_period: usize,
  /// Assign temporal depths from the hierarchy tables.
  pub hierarchical: bool,
  /// Reference gap used for low-delay depth assignment.
  pub ref_pic_gap_length: usize,
  /// Slice type of non-intra pictures in a GOP larger than 1.
  pub inter_slice_type: SliceType,
  /// Maximum reference pictures per list.
  pub max_refs: usize,

  /// Base quantizer, before per-depth offsets.
  pub qp: u8,
  /// Run lookahead analysis at push time.
  pub lookahead: bool,

  /// Tile layout.
  pub tiles: TileConfig,
  /// Slice to tile assignment.
  pub slices: SliceConfig,

  /// Enable the deblocking pass.
  pub deblock: bool,
  /// Filter across tile boundaries.
  pub cross_tile_deblock: bool,
}

/// Default preset for `EncoderConfig`.
impl Default for EncoderConfig {
  fn default() -> Self {
    EncoderConfig {
      width: 640,
      height: 480,
      bit_depth: 8,
      chroma_sampling: ChromaSampling::Cs420,
      ctu_size: 64,
      gop_size: 8,
      i_period: 0,
      hierarchical: true,
      ref_pic_gap_length: 4,
      inter_slice_type: SliceType::B,
      max_refs: 2,
      qp: 32,
      lookahead: true,
      tiles: TileConfig::default(),
      slices: SliceConfig::default(),
      deblock: true,
      cross_tile_deblock: true,
    }
  }
}

impl EncoderConfig {
  /// Low delay preset: every picture after the first is a P picture
  /// coded in display order.
  pub fn low_delay() -> Self {
    EncoderConfig {
      gop_size: 1,
      inter_slice_type: SliceType::P,
      ..Default::default()
    }
  }

  pub(crate) const fn ctu_size_log2(&self) -> usize {
    self.ctu_size.trailing_zeros() as usize
  }

  /// Picture width in CTUs, counting a partial column.
  pub const fn width_ctus(&self) -> usize {
    (self.width + self.ctu_size - 1) / self.ctu_size
  }

  /// Picture height in CTUs, counting a partial row.
  pub const fn height_ctus(&self) -> usize {
    (self.height + self.ctu_size - 1) / self.ctu_size
  }

  pub(crate) fn gop_config(&self) -> GopConfig {
    GopConfig {
      gop_size: self.gop_size as u64,
      i_period: self.i_period as u64,
      hierarchical: self.hierarchical,
      ref_pic_gap_length: self.ref_pic_gap_length as u64,
      inter_slice_type: if self.gop_size == 1 {
        SliceType::P
      } else {
        self.inter_slice_type
      },
    }
  }
}

impl fmt::Display for EncoderConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    let pairs = [
      ("size", format!("{}x{}", self.width, self.height)),
      ("bit_depth", self.bit_depth.to_string()),
      ("ctu_size", self.ctu_size.to_string()),
      ("gop_size", self.gop_size.to_string()),
      ("i_period", self.i_period.to_string()),
      ("hierarchical", self.hierarchical.to_string()),
      ("inter_slice_type", self.inter_slice_type.to_string()),
      ("max_refs", self.max_refs.to_string()),
      ("qp", self.qp.to_string()),
      ("lookahead", self.lookahead.to_string()),
      ("tiles", self.tiles.to_string()),
      ("slices", self.slices.to_string()),
      ("deblock", self.deblock.to_string()),
      ("cross_tile_deblock", self.cross_tile_deblock.to_string()),
    ];
    write!(
      f,
      "{}",
      pairs.iter().map(|pair| format!("{}={}", pair.0, pair.1)).join(" ")
    )
  }
}

/// Spacing of tile columns and rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileSpacing {
  /// Columns and rows are as equal as the CTU grid allows.
  Uniform,
  /// Explicit widths and heights, in CTUs.
  Explicit { col_widths: Vec<usize>, row_heights: Vec<usize> },
}

/// Tile layout of every picture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileConfig {
  pub cols: usize,
  pub rows: usize,
  pub spacing: TileSpacing,
}

impl Default for TileConfig {
  fn default() -> Self {
    TileConfig { cols: 1, rows: 1, spacing: TileSpacing::Uniform }
  }
}

impl TileConfig {
  pub fn uniform(cols: usize, rows: usize) -> Self {
    TileConfig { cols, rows, spacing: TileSpacing::Uniform }
  }

  /// Explicit layout; the number of columns and rows follows from the
  /// size lists.
  pub fn explicit(col_widths: Vec<usize>, row_heights: Vec<usize>) -> Self {
    TileConfig {
      cols: col_widths.len(),
      rows: row_heights.len(),
      spacing: TileSpacing::Explicit { col_widths, row_heights },
    }
  }
}

impl fmt::Display for TileConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    match &self.spacing {
      TileSpacing::Uniform => write!(f, "{}x{}", self.cols, self.rows),
      TileSpacing::Explicit { col_widths, row_heights } => write!(
        f,
        "[{}]x[{}]",
        col_widths.iter().join(","),
        row_heights.iter().join(",")
      ),
    }
  }
}

/// How tiles are grouped into slices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SliceConfig {
  /// `num_slices` slices over consecutive tile ranges.
  Contiguous { num_slices: usize },
  /// Explicit tile lists, one per slice, in coding order.
  Explicit(Vec<Vec<usize>>),
}

impl Default for SliceConfig {
  fn default() -> Self {
    SliceConfig::Contiguous { num_slices: 1 }
  }
}

impl fmt::Display for SliceConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    match self {
      SliceConfig::Contiguous { num_slices } => write!(f, "{num_slices}"),
      SliceConfig::Explicit(lists) => write!(
        f,
        "{}",
        lists.iter().map(|l| format!("[{}]", l.iter().join(","))).join("")
      ),
    }
  }
}
