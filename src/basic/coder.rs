// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::ec::BitCursor;
use crate::encoder::{CollaboratorError, EntropyCoder};
use crate::gop::SliceType;
use crate::partition::*;

/// Entropy coder writing every syntax element as an Exp-Golomb code.
///
/// The adaptive state is the QP and the intra direction of the last
/// coded block, each of which predicts the next one.
#[derive(Debug, Clone, Default)]
pub struct ExpGolombCoder {
  intra_only: bool,
  qp: u8,
  prev_dir: u8,
  bins: u64,
}

impl ExpGolombCoder {
  fn encode_cu(
    &mut self, cu: &CodingUnit, cursor: &mut BitCursor,
  ) -> Result<(), CollaboratorError> {
    if self.intra_only && !cu.mode.is_intra() {
      return Err(CollaboratorError::Entropy(format!(
        "{:?} block at ({}, {}) in an intra slice",
        cu.mode, cu.rect.x, cu.rect.y
      )));
    }

    match cu.mode {
      PredictionMode::Intra { dir } => {
        if !self.intra_only {
          cursor.write_ue(0)?;
        }
        cursor.write_bit(dir == self.prev_dir)?;
        if dir != self.prev_dir {
          cursor.write_ue(u32::from(dir))?;
        }
        self.prev_dir = dir;
      }
      PredictionMode::Inter { list, ref_idx, mv } => {
        cursor.write_ue(1)?;
        cursor.write_ue(u32::from(list))?;
        cursor.write_ue(u32::from(ref_idx))?;
        cursor.write_se(i32::from(mv.row))?;
        cursor.write_se(i32::from(mv.col))?;
      }
      PredictionMode::Skip { ref_idx } => {
        cursor.write_ue(2)?;
        cursor.write_ue(u32::from(ref_idx))?;
        return Ok(());
      }
    }
    cursor.write_se(i32::from(cu.qp_delta))?;
    cursor.write_bit(cu.cbf)?;
    Ok(())
  }
}

impl EntropyCoder for ExpGolombCoder {
  fn reset_context(&mut self, qp: u8, slice_type: SliceType) {
    *self = ExpGolombCoder {
      intra_only: slice_type == SliceType::I,
      qp,
      prev_dir: 0,
      bins: 0,
    };
  }

  fn encode_ctu(
    &mut self, decision: &CtuDecision, cursor: &mut BitCursor,
  ) -> Result<(), CollaboratorError> {
    let start = cursor.bit_pos();

    cursor.write_se(i32::from(decision.qp) - i32::from(self.qp))?;
    self.qp = decision.qp;
    for (_, node) in decision.tree.nodes() {
      match node {
        CodingTree::Split { kind, .. } => {
          cursor.write_bit(true)?;
          cursor.write_ue(kind.code())?;
        }
        CodingTree::Leaf(cu) => {
          cursor.write_bit(false)?;
          self.encode_cu(cu, cursor)?;
        }
      }
    }

    self.bins += cursor.bit_pos() - start;
    Ok(())
  }

  fn bin_count(&self) -> u64 {
    self.bins
  }

  fn snapshot(&self) -> Box<dyn EntropyCoder> {
    Box::new(self.clone())
  }
}
