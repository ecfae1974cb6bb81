// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::{
  EncoderConfig, InvalidConfig, SliceConfig, TileConfig, TileSpacing,
};
use crate::tiling::Tile;

/// Upper bound on tile columns and rows.
pub const MAX_TILE_COLS: usize = 20;
pub const MAX_TILE_ROWS: usize = 22;

/// Tiling information
///
/// Column widths and row heights, in CTUs, of the tile grid laid over
/// the picture. Recomputed only when the configuration changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingInfo {
  pub frame_width_ctus: usize,
  pub frame_height_ctus: usize,
  pub ctu_size_log2: usize,
  pub col_widths: Vec<usize>,
  pub row_heights: Vec<usize>,
  pub uniform: bool,
}

impl TilingInfo {
  /// # Errors
  ///
  /// Returns `InvalidConfig` if the tile grid does not cover the picture
  /// exactly or has an empty column or row.
  pub fn new(
    tiles: &TileConfig, frame_width_ctus: usize, frame_height_ctus: usize,
    ctu_size_log2: usize,
  ) -> Result<Self, InvalidConfig> {
    use InvalidConfig::*;

    let max_cols = frame_width_ctus.min(MAX_TILE_COLS);
    if tiles.cols == 0 || tiles.cols > max_cols {
      return Err(InvalidTileCols { actual: tiles.cols, max: max_cols });
    }
    let max_rows = frame_height_ctus.min(MAX_TILE_ROWS);
    if tiles.rows == 0 || tiles.rows > max_rows {
      return Err(InvalidTileRows { actual: tiles.rows, max: max_rows });
    }

    let (col_widths, row_heights, uniform) = match &tiles.spacing {
      TileSpacing::Uniform => (
        Self::uniform_spacing(frame_width_ctus, tiles.cols),
        Self::uniform_spacing(frame_height_ctus, tiles.rows),
        true,
      ),
      TileSpacing::Explicit { col_widths, row_heights } => {
        Self::check_sizes(col_widths, tiles.cols, frame_width_ctus)?;
        Self::check_sizes(row_heights, tiles.rows, frame_height_ctus)?;
        (col_widths.clone(), row_heights.clone(), false)
      }
    };

    Ok(TilingInfo {
      frame_width_ctus,
      frame_height_ctus,
      ctu_size_log2,
      col_widths,
      row_heights,
      uniform,
    })
  }

  pub(crate) fn from_config(
    config: &EncoderConfig,
  ) -> Result<Self, InvalidConfig> {
    TilingInfo::new(
      &config.tiles,
      config.width_ctus(),
      config.height_ctus(),
      config.ctu_size_log2(),
    )
  }

  /// Splits `total` CTUs into `parts` spans whose sizes differ by at most
  /// one.
  pub fn uniform_spacing(total: usize, parts: usize) -> Vec<usize> {
    (0..parts).map(|i| (i + 1) * total / parts - i * total / parts).collect()
  }

  fn check_sizes(
    sizes: &[usize], expected_len: usize, total: usize,
  ) -> Result<(), InvalidConfig> {
    if sizes.len() != expected_len || sizes.iter().any(|&s| s == 0) {
      return Err(InvalidConfig::TileSizes { sizes: sizes.to_vec() });
    }
    let sum: usize = sizes.iter().sum();
    if sum != total {
      return Err(InvalidConfig::TileGeometryMismatch { sum, expected: total });
    }
    Ok(())
  }

  pub fn cols(&self) -> usize {
    self.col_widths.len()
  }

  pub fn rows(&self) -> usize {
    self.row_heights.len()
  }

  pub fn tile_count(&self) -> usize {
    self.cols() * self.rows()
  }

  pub fn ctu_count(&self) -> usize {
    self.frame_width_ctus * self.frame_height_ctus
  }

  /// Builds the tile descriptors in tile raster order.
  pub fn tiles(&self) -> Vec<Tile> {
    let col_starts = starts(&self.col_widths);
    let row_starts = starts(&self.row_heights);
    let mut tiles = Vec::with_capacity(self.tile_count());
    for (&y, &h) in row_starts.iter().zip(&self.row_heights) {
      for (&x, &w) in col_starts.iter().zip(&self.col_widths) {
        tiles.push(Tile::new(tiles.len(), x, y, w, h, self.frame_width_ctus));
      }
    }
    tiles
  }
}

fn starts(sizes: &[usize]) -> Vec<usize> {
  sizes
    .iter()
    .scan(0, |acc, &s| {
      let start = *acc;
      *acc += s;
      Some(start)
    })
    .collect()
}

/// Ordered tile lists, one per slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceLayout {
  pub slices: Vec<Vec<usize>>,
  /// Whether the lists came from an explicit assignment.
  pub arbitrary: bool,
}

impl SliceLayout {
  /// # Errors
  ///
  /// Returns `InvalidConfig` unless every tile belongs to exactly one
  /// slice.
  pub fn new(
    slices: &SliceConfig, tile_count: usize,
  ) -> Result<Self, InvalidConfig> {
    use InvalidConfig::*;

    match slices {
      SliceConfig::Contiguous { num_slices } => {
        let n = *num_slices;
        if n == 0 || n > tile_count {
          return Err(InvalidSliceCount { actual: n, max: tile_count });
        }
        let slices = (0..n)
          .map(|s| (s * tile_count / n..(s + 1) * tile_count / n).collect())
          .collect();
        Ok(SliceLayout { slices, arbitrary: false })
      }
      SliceConfig::Explicit(lists) => {
        if lists.is_empty() || lists.iter().any(|l| l.is_empty()) {
          let actual = lists.len();
          return Err(InvalidSliceCount { actual, max: tile_count });
        }
        let mut owner = vec![None; tile_count];
        for (s, list) in lists.iter().enumerate() {
          for &tile in list {
            let slot = owner
              .get_mut(tile)
              .ok_or(SliceTileOutOfRange { tile, tile_count })?;
            if slot.replace(s).is_some() {
              return Err(SliceTileCoverage { tile });
            }
          }
        }
        if let Some(tile) = owner.iter().position(Option::is_none) {
          return Err(SliceTileCoverage { tile });
        }
        Ok(SliceLayout { slices: lists.clone(), arbitrary: true })
      }
    }
  }

  pub fn len(&self) -> usize {
    self.slices.len()
  }
}
