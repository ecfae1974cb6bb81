// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::encoder::{
  CollaboratorError, CtuContext, ModeDecision, RefLists, WorkerState,
};
use crate::gop::SliceType;
use crate::partition::*;
use crate::util::{CastFromPrimitive, Pixel};

/// Splits blocks whose luma variance exceeds a threshold.
///
/// The split direction follows the dominant gradient. Busy leaves get a
/// coarser quantizer, in the manner of activity masking.
#[derive(Debug, Clone, Copy)]
pub struct VarianceModeDecision {
  /// Smallest coding unit side, in luma samples.
  pub min_size: usize,
  /// Variance above which a block is split, in squared sample units.
  pub split_threshold: u32,
}

impl Default for VarianceModeDecision {
  fn default() -> Self {
    VarianceModeDecision { min_size: 8, split_threshold: 100 }
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BlockStats {
  variance: u32,
  /// Sum of absolute differences between horizontal neighbours.
  grad_h: u64,
  /// Sum of absolute differences between vertical neighbours.
  grad_v: u64,
}

/// Luma samples of one CTU, row-major with a stride of `size`.
struct CtuSamples<'a> {
  data: &'a [u32],
  size: usize,
  x0: usize,
  y0: usize,
  /// Visible part of the CTU.
  w: usize,
  h: usize,
}

impl CtuSamples<'_> {
  fn visible(&self, r: BlockRect) -> bool {
    r.x + r.w <= self.x0 + self.w && r.y + r.h <= self.y0 + self.h
  }

  fn stats(&self, r: BlockRect) -> BlockStats {
    let (lx, ly) = (r.x - self.x0, r.y - self.y0);
    let (xe, ye) = ((lx + r.w).min(self.w), (ly + r.h).min(self.h));
    if lx >= xe || ly >= ye {
      return BlockStats::default();
    }

    let (mut sum, mut sum_sq) = (0u64, 0u64);
    let (mut grad_h, mut grad_v) = (0u64, 0u64);
    for y in ly..ye {
      let row = &self.data[y * self.size..];
      for x in lx..xe {
        let p = row[x];
        sum += u64::from(p);
        sum_sq += u64::from(p) * u64::from(p);
        if x > lx {
          grad_h += u64::from(p.abs_diff(row[x - 1]));
        }
        if y > ly {
          grad_v += u64::from(p.abs_diff(self.data[(y - 1) * self.size + x]));
        }
      }
    }
    let n = ((xe - lx) * (ye - ly)) as u64;
    let variance = (sum_sq - sum * sum / n) / n;
    let variance = variance.min(u64::from(u32::MAX)) as u32;
    BlockStats { variance, grad_h, grad_v }
  }
}

impl VarianceModeDecision {
  fn split_kind(
    &self, r: BlockRect, stats: &BlockStats,
  ) -> Option<SplitKind> {
    use SplitKind::*;

    let BlockStats { grad_h, grad_v, .. } = *stats;
    let preferred = if grad_h > 4 * grad_v {
      TernaryVert
    } else if grad_v > 4 * grad_h {
      TernaryHorz
    } else if grad_h > 2 * grad_v {
      BinaryVert
    } else if grad_v > 2 * grad_h {
      BinaryHorz
    } else {
      Quad
    };
    [preferred, Quad].into_iter().find(|k| k.fits(r, self.min_size))
  }

  fn build(
    &self, s: &CtuSamples<'_>, r: BlockRect, leaf: &LeafModes,
  ) -> CodingTree {
    if !s.visible(r) {
      // Blocks crossing the picture edge are split as far as possible.
      let edge_split = [SplitKind::Quad, SplitKind::BinaryHorz]
        .into_iter()
        .find(|k| k.fits(r, self.min_size));
      if let Some(kind) = edge_split {
        return CodingTree::split(r, kind, |c| self.build(s, c, leaf));
      }
    }

    let stats = s.stats(r);
    if stats.variance > self.split_threshold {
      if let Some(kind) = self.split_kind(r, &stats) {
        return CodingTree::split(r, kind, |c| self.build(s, c, leaf));
      }
    }
    CodingTree::Leaf(self.leaf(r, &stats, leaf))
  }

  fn leaf(
    &self, rect: BlockRect, stats: &BlockStats, modes: &LeafModes,
  ) -> CodingUnit {
    let t = self.split_threshold;
    let mode = match modes.inter_list {
      Some(_) if stats.variance < t / 8 => {
        PredictionMode::Skip { ref_idx: 0 }
      }
      Some(list) => PredictionMode::Inter {
        list,
        ref_idx: 0,
        mv: MotionVector::default(),
      },
      None => PredictionMode::Intra { dir: intra_dir(stats, modes) },
    };
    let skip = matches!(mode, PredictionMode::Skip { .. });
    CodingUnit {
      rect,
      mode,
      qp_delta: if stats.variance > 16 * t { 2 } else { 0 },
      cbf: !skip && stats.variance > t / 4,
    }
  }
}

/// Leaf choices fixed for the whole CTU.
struct LeafModes {
  /// Reference list used by inter leaves, `None` for intra only.
  inter_list: Option<u8>,
  /// Direction of flat intra leaves.
  fallback_dir: u8,
}

impl LeafModes {
  fn new(slice_type: SliceType, refs: &RefLists, fallback_dir: u8) -> Self {
    let inter_list = match slice_type {
      SliceType::I => None,
      _ if !refs.l0.is_empty() => Some(0),
      SliceType::B if !refs.l1.is_empty() => Some(1),
      _ => None,
    };
    LeafModes { inter_list, fallback_dir }
  }
}

/// 0 is DC, 1 horizontal, 2 vertical.
fn intra_dir(stats: &BlockStats, modes: &LeafModes) -> u8 {
  let BlockStats { variance, grad_h, grad_v } = *stats;
  if variance == 0 {
    modes.fallback_dir
  } else if 2 * grad_h < grad_v {
    1
  } else if 2 * grad_v < grad_h {
    2
  } else {
    0
  }
}

/// Copies the visible luma samples of the CTU into `buf`.
fn load_ctu<T: Pixel>(ctx: &CtuContext<'_, T>, buf: &mut Vec<u32>) {
  let rect = ctx.rect();
  let plane = &ctx.frame.planes[0];
  let stride = plane.cfg.stride;
  let data = plane.data_origin();
  let w = rect.w.min(ctx.width.min(plane.cfg.width) - rect.x);
  let h = rect.h.min(ctx.height.min(plane.cfg.height) - rect.y);

  buf.clear();
  buf.resize(rect.w * rect.h, 0);
  for y in 0..h {
    let src = &data[(rect.y + y) * stride + rect.x..][..w];
    let dst = &mut buf[y * rect.w..][..w];
    for (d, &p) in dst.iter_mut().zip(src) {
      *d = u32::cast_from(p);
    }
  }
}

impl<T: Pixel> ModeDecision<T> for VarianceModeDecision {
  fn analyze_ctu(
    &self, ctx: &CtuContext<'_, T>, worker: &mut WorkerState,
  ) -> Result<CodingTree, CollaboratorError> {
    load_ctu(ctx, &mut worker.scratch);
    let rect = ctx.rect();
    let samples = CtuSamples {
      data: &worker.scratch,
      size: rect.w,
      x0: rect.x,
      y0: rect.y,
      w: rect.w.min(ctx.width - rect.x),
      h: rect.h.min(ctx.height - rect.y),
    };

    let fallback_dir = ctx
      .neighbor(-1, 0)
      .and_then(|left| left.tree.leaves().last())
      .and_then(|cu| match cu.mode {
        PredictionMode::Intra { dir } => Some(dir),
        _ => None,
      })
      .unwrap_or(0);
    let picture = ctx.picture;
    let modes = LeafModes::new(
      picture.decision.slice_type,
      &picture.ref_lists,
      fallback_dir,
    );
    Ok(self.build(&samples, rect, &modes))
  }
}
