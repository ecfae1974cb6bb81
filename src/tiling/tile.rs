// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// CTU rectangle coded independently of the other tiles of a picture.
#[derive(Debug)]
pub struct Tile {
  pub index: usize,
  /// Raster address of the top-left CTU.
  pub first_ctu_addr: usize,
  /// Position of the tile in the CTU grid.
  pub x_ctus: usize,
  pub y_ctus: usize,
  pub width_ctus: usize,
  pub height_ctus: usize,
  pub qp: u8,
  /// QP the entropy coder predicts the first delta from.
  pub qp_prev_for_entropy: u8,
  /// CTUs of the current picture not yet decided.
  pub remaining_ctu_count: AtomicUsize,
  frame_width_ctus: usize,
}

impl Tile {
  pub(crate) fn new(
    index: usize, x_ctus: usize, y_ctus: usize, width_ctus: usize,
    height_ctus: usize, frame_width_ctus: usize,
  ) -> Self {
    Tile {
      index,
      first_ctu_addr: y_ctus * frame_width_ctus + x_ctus,
      x_ctus,
      y_ctus,
      width_ctus,
      height_ctus,
      qp: 0,
      qp_prev_for_entropy: 0,
      remaining_ctu_count: AtomicUsize::new(0),
      frame_width_ctus,
    }
  }

  pub const fn ctu_count(&self) -> usize {
    self.width_ctus * self.height_ctus
  }

  /// Raster address of the CTU at tile-relative `(x, y)`.
  pub const fn ctu_addr(&self, x: usize, y: usize) -> usize {
    self.first_ctu_addr + y * self.frame_width_ctus + x
  }

  /// Picture CTU columns covered by the tile.
  pub const fn cols(&self) -> Range<usize> {
    self.x_ctus..self.x_ctus + self.width_ctus
  }

  /// Picture CTU rows covered by the tile.
  pub const fn rows(&self) -> Range<usize> {
    self.y_ctus..self.y_ctus + self.height_ctus
  }

  pub fn contains(&self, ctu_x: usize, ctu_y: usize) -> bool {
    self.cols().contains(&ctu_x) && self.rows().contains(&ctu_y)
  }

  /// CTU addresses of the tile in coding (raster) order.
  pub fn ctu_addrs(&self) -> impl Iterator<Item = usize> + '_ {
    (0..self.height_ctus).flat_map(move |y| {
      (0..self.width_ctus).map(move |x| self.ctu_addr(x, y))
    })
  }

  /// Prepares the tile for a new picture coded at `qp`.
  pub(crate) fn begin_picture(&mut self, qp: u8) {
    self.qp = qp;
    self.qp_prev_for_entropy = qp;
    *self.remaining_ctu_count.get_mut() = self.ctu_count();
  }

  /// Records one more decided CTU and returns how many remain.
  pub(crate) fn ctu_done(&self) -> usize {
    let prev = self.remaining_ctu_count.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(prev > 0);
    prev - 1
  }

  pub fn remaining(&self) -> usize {
    self.remaining_ctu_count.load(Ordering::Acquire)
  }
}
