// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::partition::{CodingTree, CtuDecision, PredictionMode, SplitKind};
use std::ops::{Add, AddAssign};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EncoderStats {
  /// Number of CTUs coded
  pub ctus: usize,
  /// Number of coding units per prediction type
  pub intra_cus: usize,
  pub inter_cus: usize,
  pub skip_cus: usize,
  /// Stores count of splits of each kind, indexed by split code
  pub split_counts: [usize; SplitKind::ALL.len()],
  /// Deepest coding tree level reached
  pub max_depth: usize,
  /// Bins produced by the entropy coder in the committed pass
  pub bins: u64,
  /// Slice payload bytes, excluding headers and padding
  pub payload_bytes: usize,
  /// CABAC zero words appended
  pub zero_words: usize,
  pub deblocked_edges: u64,
  pub slices: usize,
  pub tiles: usize,
}

impl EncoderStats {
  /// Accounts for the coding tree of one CTU.
  pub fn add_decision(&mut self, decision: &CtuDecision) {
    self.ctus += 1;
    for (depth, node) in decision.tree.nodes() {
      self.max_depth = self.max_depth.max(depth);
      match node {
        CodingTree::Split { kind, .. } => {
          self.split_counts[kind.code() as usize] += 1;
        }
        CodingTree::Leaf(cu) => match cu.mode {
          PredictionMode::Intra { .. } => self.intra_cus += 1,
          PredictionMode::Inter { .. } => self.inter_cus += 1,
          PredictionMode::Skip { .. } => self.skip_cus += 1,
        },
      }
    }
  }

  pub fn coding_units(&self) -> usize {
    self.intra_cus + self.inter_cus + self.skip_cus
  }
}

impl Add<&Self> for EncoderStats {
  type Output = Self;

  fn add(self, rhs: &EncoderStats) -> Self::Output {
    let mut lhs = self;
    lhs += rhs;
    lhs
  }
}

impl AddAssign<&Self> for EncoderStats {
  fn add_assign(&mut self, rhs: &EncoderStats) {
    self.ctus += rhs.ctus;
    self.intra_cus += rhs.intra_cus;
    self.inter_cus += rhs.inter_cus;
    self.skip_cus += rhs.skip_cus;
    self
      .split_counts
      .iter_mut()
      .zip(rhs.split_counts.iter())
      .for_each(|(l, r)| *l += r);
    self.max_depth = self.max_depth.max(rhs.max_depth);
    self.bins += rhs.bins;
    self.payload_bytes += rhs.payload_bytes;
    self.zero_words += rhs.zero_words;
    self.deblocked_edges += rhs.deblocked_edges;
    self.slices += rhs.slices;
    self.tiles += rhs.tiles;
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::partition::{BlockRect, CodingUnit};

  #[test]
  fn decision_counts() {
    let rect = BlockRect { x: 0, y: 0, w: 32, h: 32 };
    let mut first = true;
    let tree = CodingTree::split(rect, SplitKind::Quad, |r| {
      if std::mem::take(&mut first) {
        CodingTree::split(r, SplitKind::BinaryVert, |r| {
          CodingTree::Leaf(CodingUnit {
            rect: r,
            mode: PredictionMode::Skip { ref_idx: 0 },
            qp_delta: 0,
            cbf: false,
          })
        })
      } else {
        CodingTree::Leaf(CodingUnit {
          rect: r,
          mode: PredictionMode::Intra { dir: 1 },
          qp_delta: 0,
          cbf: true,
        })
      }
    });

    let mut stats = EncoderStats::default();
    stats.add_decision(&CtuDecision { addr: 0, qp: 30, tree });
    assert_eq!(stats.ctus, 1);
    assert_eq!(stats.skip_cus, 2);
    assert_eq!(stats.intra_cus, 3);
    assert_eq!(stats.coding_units(), 5);
    assert_eq!(stats.split_counts, [1, 0, 1, 0, 0]);
    assert_eq!(stats.max_depth, 2);

    let total = EncoderStats::default() + &stats + &stats;
    assert_eq!(total.ctus, 2);
    assert_eq!(total.max_depth, 2);
  }
}
