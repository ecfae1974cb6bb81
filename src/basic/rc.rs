// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::MAX_QP;
use crate::encoder::{PictureMeta, RateControl};

/// QP offset added at each GOP depth, intra pictures first.
const DEPTH_QP_OFFSET: [u8; 6] = [0, 1, 2, 3, 4, 4];

/// Largest bias applied for a picture whose lookahead cost differs from
/// the running mean.
const MAX_COMPLEXITY_BIAS: i32 = 3;

/// Constant QP with temporal depth offsets.
///
/// When lookahead costs are available the QP is nudged by the log ratio
/// of the picture cost to the running mean of the pictures coded so far.
#[derive(Debug, Clone, Default)]
pub struct ConstantQp {
  mean_complexity: Option<f64>,
}

impl ConstantQp {
  fn bias(&self, complexity: Option<f64>) -> i32 {
    match (complexity, self.mean_complexity) {
      (Some(c), Some(mean)) if c > 0.0 && mean > 0.0 => {
        let bias = (2.0 * (c / mean).log2()).round() as i32;
        bias.clamp(-MAX_COMPLEXITY_BIAS, MAX_COMPLEXITY_BIAS)
      }
      _ => 0,
    }
  }
}

impl RateControl for ConstantQp {
  fn frame_qp(&mut self, meta: &PictureMeta) -> u8 {
    let depth = usize::from(meta.decision.depth);
    let offset = DEPTH_QP_OFFSET[depth.min(DEPTH_QP_OFFSET.len() - 1)];
    let qp = i32::from(meta.base_qp)
      + i32::from(offset)
      + self.bias(meta.complexity);
    qp.clamp(0, i32::from(MAX_QP)) as u8
  }

  fn update(&mut self, meta: &PictureMeta, _qp: u8, _bits: u64) {
    if let Some(c) = meta.complexity {
      let mean = self.mean_complexity.map_or(c, |m| 0.75 * m + 0.25 * c);
      self.mean_complexity = Some(mean);
    }
  }
}
