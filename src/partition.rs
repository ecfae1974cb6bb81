// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Frozen per-CTU coding decisions.
//!
//! A CTU decision is an explicit tree of split nodes and coding-unit
//! leaves. Walking it never needs parent links: [`CodingTree::nodes`]
//! keeps its own stack.

use arrayvec::ArrayVec;
use num_traits::FromPrimitive;

use std::fmt;

/// How a block is divided into children.
#[derive(
  Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive,
)]
pub enum SplitKind {
  /// Four equal quadrants.
  Quad = 0,
  /// Two halves stacked vertically (horizontal split line).
  BinaryHorz = 1,
  /// Two halves side by side (vertical split line).
  BinaryVert = 2,
  /// Quarter, half, quarter, stacked vertically.
  TernaryHorz = 3,
  /// Quarter, half, quarter, side by side.
  TernaryVert = 4,
}

impl SplitKind {
  /// All split kinds, in code order.
  pub const ALL: [SplitKind; 5] = [
    SplitKind::Quad,
    SplitKind::BinaryHorz,
    SplitKind::BinaryVert,
    SplitKind::TernaryHorz,
    SplitKind::TernaryVert,
  ];

  /// Number of children produced by the split.
  pub const fn num_children(self) -> usize {
    match self {
      SplitKind::Quad => 4,
      SplitKind::BinaryHorz | SplitKind::BinaryVert => 2,
      SplitKind::TernaryHorz | SplitKind::TernaryVert => 3,
    }
  }

  /// Code written to the bitstream for this split.
  pub const fn code(self) -> u32 {
    self as u32
  }

  /// Inverse of [`SplitKind::code`].
  pub fn from_code(code: u32) -> Option<Self> {
    SplitKind::from_u32(code)
  }

  /// Whether `rect` can be divided by this split without producing
  /// blocks smaller than `min_size` on either side.
  pub fn fits(self, rect: BlockRect, min_size: usize) -> bool {
    match self {
      SplitKind::Quad => rect.w >= 2 * min_size && rect.h >= 2 * min_size,
      SplitKind::BinaryHorz => rect.h >= 2 * min_size,
      SplitKind::BinaryVert => rect.w >= 2 * min_size,
      SplitKind::TernaryHorz => rect.h >= 4 * min_size,
      SplitKind::TernaryVert => rect.w >= 4 * min_size,
    }
  }

  /// Child rectangles in coding order.
  pub fn child_rects(self, rect: BlockRect) -> ArrayVec<BlockRect, 4> {
    let BlockRect { x, y, w, h } = rect;
    let mut out = ArrayVec::new();
    match self {
      SplitKind::Quad => {
        let (hw, hh) = (w / 2, h / 2);
        out.push(BlockRect { x, y, w: hw, h: hh });
        out.push(BlockRect { x: x + hw, y, w: hw, h: hh });
        out.push(BlockRect { x, y: y + hh, w: hw, h: hh });
        out.push(BlockRect { x: x + hw, y: y + hh, w: hw, h: hh });
      }
      SplitKind::BinaryHorz => {
        out.push(BlockRect { x, y, w, h: h / 2 });
        out.push(BlockRect { x, y: y + h / 2, w, h: h / 2 });
      }
      SplitKind::BinaryVert => {
        out.push(BlockRect { x, y, w: w / 2, h });
        out.push(BlockRect { x: x + w / 2, y, w: w / 2, h });
      }
      SplitKind::TernaryHorz => {
        let q = h / 4;
        out.push(BlockRect { x, y, w, h: q });
        out.push(BlockRect { x, y: y + q, w, h: 2 * q });
        out.push(BlockRect { x, y: y + 3 * q, w, h: q });
      }
      SplitKind::TernaryVert => {
        let q = w / 4;
        out.push(BlockRect { x, y, w: q, h });
        out.push(BlockRect { x: x + q, y, w: 2 * q, h });
        out.push(BlockRect { x: x + 3 * q, y, w: q, h });
      }
    }
    out
  }
}

impl fmt::Display for SplitKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SplitKind::Quad => "QT",
      SplitKind::BinaryHorz => "BT_H",
      SplitKind::BinaryVert => "BT_V",
      SplitKind::TernaryHorz => "TT_H",
      SplitKind::TernaryVert => "TT_V",
    };
    f.write_str(s)
  }
}

/// A rectangle in luma samples, relative to the picture origin.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockRect {
  pub x: usize,
  pub y: usize,
  pub w: usize,
  pub h: usize,
}

impl BlockRect {
  /// Whether any part of the block lies outside a picture of the given
  /// dimensions.
  pub const fn crosses(&self, width: usize, height: usize) -> bool {
    self.x + self.w > width || self.y + self.h > height
  }

  pub const fn area(&self) -> usize {
    self.w * self.h
  }
}

/// Motion vector in quarter-sample units.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MotionVector {
  pub row: i16,
  pub col: i16,
}

/// Prediction chosen for a coding unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PredictionMode {
  /// Intra prediction with the given direction index.
  Intra { dir: u8 },
  /// Inter prediction from a reference list entry.
  Inter { list: u8, ref_idx: u8, mv: MotionVector },
  /// Inter prediction with no residual, merged from a neighbour.
  Skip { ref_idx: u8 },
}

impl PredictionMode {
  pub const fn is_intra(&self) -> bool {
    matches!(self, PredictionMode::Intra { .. })
  }
}

/// Leaf of a coding tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CodingUnit {
  pub rect: BlockRect,
  pub mode: PredictionMode,
  /// QP delta relative to the CTU QP.
  pub qp_delta: i8,
  /// Whether any residual is coded.
  pub cbf: bool,
}

/// Coding tree of one CTU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodingTree {
  Leaf(CodingUnit),
  Split { rect: BlockRect, kind: SplitKind, children: Vec<CodingTree> },
}

impl CodingTree {
  /// Splits `rect` and builds each child with `child`.
  pub fn split<F>(rect: BlockRect, kind: SplitKind, child: F) -> Self
  where
    F: FnMut(BlockRect) -> CodingTree,
  {
    let children = kind.child_rects(rect).into_iter().map(child).collect();
    CodingTree::Split { rect, kind, children }
  }

  pub fn rect(&self) -> BlockRect {
    match self {
      CodingTree::Leaf(cu) => cu.rect,
      CodingTree::Split { rect, .. } => *rect,
    }
  }

  /// Pre-order walk yielding every node with its depth.
  pub fn nodes(&self) -> TreeNodes<'_> {
    TreeNodes { stack: vec![(0, self)] }
  }

  /// Coding units in coding order.
  pub fn leaves(&self) -> impl Iterator<Item = &CodingUnit> {
    self.nodes().filter_map(|(_, node)| match node {
      CodingTree::Leaf(cu) => Some(cu),
      CodingTree::Split { .. } => None,
    })
  }

  /// Checks that every split has the expected number of children and
  /// that the children cover exactly the rectangles of their split.
  pub fn is_well_formed(&self) -> bool {
    self.nodes().all(|(_, node)| match node {
      CodingTree::Leaf(_) => true,
      CodingTree::Split { rect, kind, children } => {
        let expected = kind.child_rects(*rect);
        children.len() == kind.num_children()
          && children.iter().zip(expected.iter()).all(|(c, r)| c.rect() == *r)
      }
    })
  }
}

/// Iterator returned by [`CodingTree::nodes`].
pub struct TreeNodes<'a> {
  stack: Vec<(usize, &'a CodingTree)>,
}

impl<'a> Iterator for TreeNodes<'a> {
  type Item = (usize, &'a CodingTree);

  fn next(&mut self) -> Option<Self::Item> {
    let (depth, node) = self.stack.pop()?;
    if let CodingTree::Split { children, .. } = node {
      self.stack.extend(children.iter().rev().map(|c| (depth + 1, c)));
    }
    Some((depth, node))
  }
}

/// Frozen decision for one CTU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CtuDecision {
  /// CTU address in picture raster order.
  pub addr: usize,
  pub qp: u8,
  pub tree: CodingTree,
}
