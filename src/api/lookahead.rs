// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::frame::{Frame, Plane};
use crate::util::{CastFromPrimitive, Pixel};

use rayon::prelude::*;

/// Side of the analysis blocks on the downsampled plane.
pub(crate) const ANALYSIS_BLOCK_SIZE: usize = 8;

/// Picture analysis computed when a picture is pushed.
#[derive(Debug, Clone)]
pub(crate) struct FrameAnalysis<T: Pixel> {
  /// Luma at half resolution.
  pub downsampled: Plane<T>,
  /// Intra cost of every analysis block, in raster order.
  pub block_costs: Box<[u32]>,
  pub cols: usize,
  pub rows: usize,
}

impl<T: Pixel> FrameAnalysis<T> {
  /// Analyzes the visible `width` x `height` area of `frame`. The
  /// luma plane may be padded beyond it.
  pub fn new(frame: &Frame<T>, width: usize, height: usize) -> Self {
    let luma = &frame.planes[0];
    let downsampled = luma.downsampled(width, height);
    let cols = width / 2 / ANALYSIS_BLOCK_SIZE;
    let rows = height / 2 / ANALYSIS_BLOCK_SIZE;
    let block_costs = estimate_intra_costs(&downsampled, cols, rows);
    FrameAnalysis { downsampled, block_costs, cols, rows }
  }

  /// Average block cost, `None` for pictures too small to analyze.
  pub fn mean_cost(&self) -> Option<f64> {
    if self.block_costs.is_empty() {
      return None;
    }
    let total: u64 = self.block_costs.iter().map(|&c| u64::from(c)).sum();
    Some(total as f64 / self.block_costs.len() as f64)
  }
}

/// Sum of absolute differences from a flat (DC) prediction of every
/// block.
pub(crate) fn estimate_intra_costs<T: Pixel>(
  plane: &Plane<T>, cols: usize, rows: usize,
) -> Box<[u32]> {
  let stride = plane.cfg.stride;
  let data = plane.data_origin();

  let block_cost = |bx: usize, by: usize| {
    let rows = (0..ANALYSIS_BLOCK_SIZE).map(|y| {
      let start = (by * ANALYSIS_BLOCK_SIZE + y) * stride
        + bx * ANALYSIS_BLOCK_SIZE;
      &data[start..start + ANALYSIS_BLOCK_SIZE]
    });
    let sum: u32 = rows.clone().flatten().map(|&p| u32::cast_from(p)).sum();
    let area = (ANALYSIS_BLOCK_SIZE * ANALYSIS_BLOCK_SIZE) as u32;
    let dc = (sum + area / 2) / area;
    rows.flatten().map(|&p| u32::cast_from(p).abs_diff(dc)).sum::<u32>()
  };

  (0..rows * cols)
    .into_par_iter()
    .map(|i| block_cost(i % cols, i / cols))
    .collect::<Vec<_>>()
    .into_boxed_slice()
}
