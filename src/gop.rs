// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Slice type, POC and temporal depth decisions.
//!
//! Decisions are evaluated without side effects and only committed once
//! the picture they describe has been encoded, so a failed or repeated
//! encode call sees the same schedule again.

use std::fmt;

/// Largest supported GOP.
pub const MAX_GOP_SIZE: u64 = 16;

/// Temporal depth of the interior pictures of a hierarchical GOP, by
/// `log2(gop_size) - 1` and position inside the GOP.
const DEPTH_TABLE: [&[u8]; 4] = [
  &[2],
  &[2, 3, 3],
  &[2, 3, 3, 4, 4, 4, 4],
  &[2, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 5, 5, 5, 5],
];

/// Depth of low-delay P pictures by `log2(ref_pic_gap_length)` and
/// position inside the reference gap.
const P_DEPTH_TABLE: [&[u8]; 5] = [
  &[1],
  &[2, 1],
  &[3, 2, 3, 1],
  &[4, 3, 4, 2, 4, 3, 4, 1],
  &[5, 4, 5, 3, 5, 4, 5, 2, 5, 4, 5, 3, 5, 4, 5, 1],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceType {
  B,
  P,
  I,
}

impl SliceType {
  /// Value written in slice headers.
  pub const fn code(self) -> u32 {
    match self {
      SliceType::B => 0,
      SliceType::P => 1,
      SliceType::I => 2,
    }
  }

  pub const fn is_intra(self) -> bool {
    matches!(self, SliceType::I)
  }
}

impl fmt::Display for SliceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SliceType::B => "B",
      SliceType::P => "P",
      SliceType::I => "I",
    };
    f.write_str(s)
  }
}

/// Picture-level coding parameters chosen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceDecision {
  pub poc: u64,
  pub slice_type: SliceType,
  /// Temporal depth, 0 for intra pictures.
  pub depth: u8,
  pub temporal_id: u8,
  /// Whether later pictures may reference this one.
  pub ref_flag: bool,
}

impl SliceDecision {
  const fn intra(poc: u64, ref_flag: bool) -> Self {
    SliceDecision {
      poc,
      slice_type: SliceType::I,
      depth: 0,
      temporal_id: 0,
      ref_flag,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GopConfig {
  pub gop_size: u64,
  /// Distance between intra pictures, 0 for a single leading intra.
  pub i_period: u64,
  pub hierarchical: bool,
  /// Reference gap used to pick depths in low-delay mode.
  pub ref_pic_gap_length: u64,
  /// Slice type of non-intra pictures when `gop_size > 1`.
  pub inter_slice_type: SliceType,
}

impl GopConfig {
  /// Pictures that must be buffered before the first one can be coded.
  pub const fn max_b_frames(&self) -> u64 {
    if self.gop_size > 1 {
      self.gop_size - 1
    } else {
      0
    }
  }

  /// Number of input slots needed to hold every picture the scheduler
  /// may look at.
  pub const fn ring_capacity(&self) -> usize {
    1 + 2 * self.max_b_frames() as usize
  }

  fn deepest(&self) -> u8 {
    let row = DEPTH_TABLE[self.gop_size.trailing_zeros() as usize - 1];
    row[row.len() - 1]
  }
}

/// State of the hierarchical POC derivation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PocState {
  prev_poc: u64,
  prev_doc_offset: u64,
}

impl PocState {
  fn expected_tid(doc: u64) -> u8 {
    if doc == 0 {
      0
    } else {
      1 + doc.ilog2() as u8
    }
  }

  /// Derives the POC of the next picture at `temporal_id` in a
  /// hierarchy of `sub_gop` pictures.
  fn derive(self, temporal_id: u8, sub_gop: u64) -> (u64, PocState) {
    if temporal_id == 0 {
      let poc = self.prev_poc + sub_gop;
      return (poc, PocState { prev_poc: poc, prev_doc_offset: 0 });
    }

    let mut prev_poc = self.prev_poc;
    let mut doc = (self.prev_doc_offset + 1) % sub_gop;
    if doc == 0 {
      prev_poc += sub_gop;
    }
    while Self::expected_tid(doc) != temporal_id {
      doc = (doc + 1) % sub_gop;
    }

    let offset = (sub_gop * (2 * doc + 1)) >> temporal_id;
    let poc = (prev_poc + offset).saturating_sub(2 * sub_gop);
    (poc, PocState { prev_poc, prev_doc_offset: doc })
  }
}

/// A decision evaluated against the current state, not yet committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pending {
  pub decision: SliceDecision,
  poc_state: PocState,
  force_ignored: u64,
}

pub(crate) struct GopScheduler {
  cfg: GopConfig,
  poc_state: PocState,
  /// How far the bumping scan got in the current GOP.
  force_ignored: u64,
}

impl GopScheduler {
  pub fn new(cfg: GopConfig) -> Self {
    GopScheduler {
      cfg,
      poc_state: PocState::default(),
      force_ignored: 0,
    }
  }

  pub const fn config(&self) -> &GopConfig {
    &self.cfg
  }

  pub fn set_i_period(&mut self, i_period: u64) {
    self.cfg.i_period = i_period;
  }

  /// Whether more input is needed before anything can be scheduled.
  pub const fn needs_more_input(&self, pushed: u64, bumping: bool) -> bool {
    !bumping && pushed < self.cfg.max_b_frames()
  }

  /// Evaluates the next picture to encode.
  ///
  /// `encoded` counts committed pictures, `pushed` counts pictures
  /// received so far and `holds(poc)` tells whether that picture is
  /// buffered and not yet encoded. Returns `None` if the scheduled
  /// picture has not arrived yet, or, while bumping, if no remaining
  /// GOP position maps to a buffered picture.
  pub fn next<F>(
    &self, encoded: u64, pushed: u64, bumping: bool, holds: F,
  ) -> Option<Pending>
  where
    F: Fn(u64) -> bool,
  {
    let pending = |decision: SliceDecision, poc_state, force_ignored| {
      holds(decision.poc).then_some(Pending {
        decision,
        poc_state,
        force_ignored,
      })
    };

    if self.cfg.gop_size == 1 {
      let decision = self.decide_low_delay(encoded);
      return pending(decision, self.poc_state, self.force_ignored);
    }

    let k = encoded + self.cfg.max_b_frames();
    if k == self.cfg.gop_size - 1 {
      let decision = SliceDecision::intra(0, true);
      return pending(decision, PocState::default(), self.force_ignored);
    }

    if bumping {
      let mut state = self.poc_state;
      for offset in self.force_ignored..self.cfg.gop_size {
        let (decision, next) = self.decide_normal(k + offset, state);
        state = next;
        if decision.poc < pushed && holds(decision.poc) {
          trace!("bumping picked poc {} at offset {}", decision.poc, offset);
          return Some(Pending {
            decision,
            poc_state: next,
            force_ignored: offset,
          });
        }
      }
      return None;
    }

    let (decision, next) = self.decide_normal(k, self.poc_state);
    pending(decision, next, self.force_ignored)
  }

  /// Decision for a buffered picture that no GOP position maps to while
  /// bumping. Coded as a non-reference picture; committing it leaves the
  /// POC derivation where it was.
  pub fn fallback(&self, poc: u64) -> Pending {
    let (depth, temporal_id) = if self.cfg.gop_size > 1 {
      let deepest = self.cfg.deepest();
      (deepest, deepest - 1)
    } else {
      (1, 0)
    };
    Pending {
      decision: SliceDecision {
        poc,
        slice_type: self.cfg.inter_slice_type,
        depth,
        temporal_id,
        ref_flag: false,
      },
      poc_state: self.poc_state,
      force_ignored: self.force_ignored,
    }
  }

  /// Advances the state past an encoded picture.
  pub fn commit(&mut self, pending: &Pending) {
    self.poc_state = pending.poc_state;
    self.force_ignored = pending.force_ignored;
  }

  fn decide_low_delay(&self, k: u64) -> SliceDecision {
    let cfg = &self.cfg;
    if cfg.i_period == 1 {
      return SliceDecision::intra(k, false);
    }
    let m = if cfg.i_period == 0 { k } else { k % cfg.i_period };
    if m == 0 {
      return SliceDecision::intra(k, true);
    }

    let depth = if cfg.hierarchical {
      let gap = cfg.ref_pic_gap_length;
      P_DEPTH_TABLE[gap.trailing_zeros() as usize][((m - 1) % gap) as usize]
    } else {
      1
    };
    SliceDecision {
      poc: k,
      slice_type: SliceType::P,
      depth,
      temporal_id: 0,
      ref_flag: true,
    }
  }

  fn decide_normal(
    &self, k: u64, state: PocState,
  ) -> (SliceDecision, PocState) {
    let cfg = &self.cfg;
    let gop = cfg.gop_size;
    let m = k % gop;

    let is_intra = if cfg.i_period == 0 {
      k == 0
    } else {
      k % cfg.i_period == 0
    };
    let boundary = PocState { prev_poc: k, prev_doc_offset: 0 };
    if is_intra {
      return (SliceDecision::intra(k, true), boundary);
    }
    if m == 0 {
      let decision = SliceDecision {
        poc: k,
        slice_type: cfg.inter_slice_type,
        depth: 1,
        temporal_id: 0,
        ref_flag: true,
      };
      return (decision, boundary);
    }

    let pos = (m - 1) as usize;
    if cfg.hierarchical {
      let depth = DEPTH_TABLE[gop.trailing_zeros() as usize - 1][pos];
      let temporal_id = depth - 1;
      let (poc, next) = state.derive(temporal_id, gop);
      let decision = SliceDecision {
        poc,
        slice_type: cfg.inter_slice_type,
        depth,
        temporal_id,
        ref_flag: depth != cfg.deepest(),
      };
      (decision, next)
    } else {
      let poc = (k / gop * gop + pos as u64 + 1).saturating_sub(gop);
      let decision = SliceDecision {
        poc,
        slice_type: cfg.inter_slice_type,
        depth: 2,
        temporal_id: 0,
        ref_flag: false,
      };
      (decision, state)
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  use interpolate_name::interpolate_test;
  use pretty_assertions::assert_eq;

  use std::collections::BTreeSet;

  fn config(gop_size: u64, i_period: u64, hierarchical: bool) -> GopConfig {
    GopConfig {
      gop_size,
      i_period,
      hierarchical,
      ref_pic_gap_length: 4,
      inter_slice_type: SliceType::B,
    }
  }

  /// Pushes `n` pictures one at a time, encoding whatever is ready after
  /// each push, then drains. Returns the decisions in coding order.
  fn schedule(cfg: GopConfig, n: u64) -> Vec<SliceDecision> {
    let mut gop = GopScheduler::new(cfg);
    let mut buffered = BTreeSet::new();
    let mut out = Vec::new();
    let mut pushed = 0;

    let mut drain = |gop: &mut GopScheduler,
                     buffered: &mut BTreeSet<u64>,
                     pushed: u64,
                     bumping: bool| {
      while !buffered.is_empty() && !gop.needs_more_input(pushed, bumping) {
        let encoded = out.len() as u64;
        let holds = |poc| buffered.contains(&poc);
        let Some(pending) = gop.next(encoded, pushed, bumping, holds) else {
          assert!(!bumping, "bumping stalled with {buffered:?}");
          break;
        };
        gop.commit(&pending);
        buffered.remove(&pending.decision.poc);
        out.push(pending.decision);
      }
    };

    for _ in 0..n {
      buffered.insert(pushed);
      pushed += 1;
      drain(&mut gop, &mut buffered, pushed, false);
    }
    drain(&mut gop, &mut buffered, pushed, true);
    assert!(buffered.is_empty());
    out
  }

  fn pocs(decisions: &[SliceDecision]) -> Vec<u64> {
    decisions.iter().map(|d| d.poc).collect()
  }

  #[test]
  fn low_delay_intra_period() {
    let decisions = schedule(config(1, 4, false), 6);
    let types: Vec<SliceType> =
      decisions.iter().map(|d| d.slice_type).collect();
    use SliceType::*;
    assert_eq!(types, [I, P, P, P, I, P]);
    assert_eq!(pocs(&decisions), [0, 1, 2, 3, 4, 5]);
    assert!(decisions.iter().all(|d| d.temporal_id == 0));
  }

  #[test]
  fn all_intra() {
    let decisions = schedule(config(1, 1, true), 5);
    assert!(decisions.iter().all(|d| d.slice_type == SliceType::I));
    assert!(decisions.iter().all(|d| d.depth == 0 && !d.ref_flag));
    assert_eq!(pocs(&decisions), [0, 1, 2, 3, 4]);
  }

  #[test]
  fn low_delay_depths_follow_reference_gap() {
    let decisions = schedule(config(1, 0, true), 9);
    let depths: Vec<u8> = decisions.iter().map(|d| d.depth).collect();
    assert_eq!(depths, [0, 3, 2, 3, 1, 3, 2, 3, 1]);
  }

  #[test]
  fn hierarchical_gop8_order() {
    let decisions = schedule(config(8, 0, true), 20);
    assert_eq!(
      pocs(&decisions),
      [0, 8, 4, 2, 6, 1, 3, 5, 7, 16, 12, 10, 14, 9, 11, 13, 15, 18, 17, 19]
    );
    let depths: Vec<u8> = decisions[..9].iter().map(|d| d.depth).collect();
    assert_eq!(depths, [0, 1, 2, 3, 3, 4, 4, 4, 4]);
    for d in &decisions {
      assert_eq!(d.ref_flag, d.depth != 4, "poc {}", d.poc);
      assert_eq!(d.temporal_id, d.depth.saturating_sub(1));
    }
  }

  #[test]
  fn intra_period_inside_hierarchy() {
    let decisions = schedule(config(4, 8, true), 10);
    assert_eq!(pocs(&decisions), [0, 4, 2, 1, 3, 8, 6, 5, 7, 9]);
    let intra: Vec<u64> = decisions
      .iter()
      .filter(|d| d.slice_type == SliceType::I)
      .map(|d| d.poc)
      .collect();
    assert_eq!(intra, [0, 8]);
  }

  #[test]
  fn flat_gop_uses_fixed_depth() {
    let decisions = schedule(config(4, 0, false), 9);
    assert_eq!(pocs(&decisions), [0, 4, 1, 2, 3, 8, 5, 6, 7]);
    for d in &decisions[2..5] {
      assert_eq!((d.depth, d.temporal_id, d.ref_flag), (2, 0, false));
    }
  }

  #[interpolate_test(gop2, 2)]
  #[interpolate_test(gop4, 4)]
  #[interpolate_test(gop8, 8)]
  #[interpolate_test(gop16, 16)]
  fn one_gop_covers_depth_row(gop_size: u64) {
    let decisions = schedule(config(gop_size, 0, true), 3 * gop_size + 1);
    let mut first_gop: Vec<&SliceDecision> =
      decisions.iter().filter(|d| d.poc < gop_size).collect();
    first_gop.sort_by_key(|d| d.poc);

    assert_eq!(first_gop.iter().filter(|d| d.depth == 0).count(), 1);
    let interior: Vec<u8> = {
      let mut v: Vec<u8> = first_gop[1..].iter().map(|d| d.depth).collect();
      v.sort_unstable();
      v
    };
    let row = DEPTH_TABLE[gop_size.trailing_zeros() as usize - 1];
    assert_eq!(interior, row);
  }

  #[interpolate_test(gop2, 2)]
  #[interpolate_test(gop4, 4)]
  #[interpolate_test(gop8, 8)]
  #[interpolate_test(gop16, 16)]
  fn every_picture_scheduled_once(gop_size: u64) {
    for hierarchical in [true, false] {
      for i_period in [0, gop_size, 2 * gop_size] {
        for n in 1..=3 * gop_size + 5 {
          let cfg = config(gop_size, i_period, hierarchical);
          let mut got = pocs(&schedule(cfg, n));
          got.sort_unstable();
          assert_eq!(got, (0..n).collect::<Vec<_>>(), "{cfg:?} n={n}");
        }
      }
    }
  }

  #[test]
  fn evaluation_is_idempotent() {
    let mut gop = GopScheduler::new(config(8, 0, true));
    let holds = |poc: u64| poc < 5;
    let first = gop.next(0, 5, true, holds).unwrap();
    gop.commit(&first);
    let a = gop.next(1, 5, true, holds);
    let b = gop.next(1, 5, true, holds);
    assert_eq!(a, b);
  }

  #[test]
  fn ring_capacity_from_gop() {
    assert_eq!(config(1, 0, true).ring_capacity(), 1);
    assert_eq!(config(8, 0, true).ring_capacity(), 15);
    assert_eq!(config(16, 0, true).max_b_frames(), 15);
  }

  #[test]
  fn fallback_keeps_the_state() {
    let mut gop = GopScheduler::new(config(8, 0, true));
    let first = gop.next(0, 7, false, |_| true).unwrap();
    gop.commit(&first);

    let fallback = gop.fallback(5);
    assert_eq!(fallback.decision.poc, 5);
    assert_eq!(fallback.decision.depth, 4);
    assert!(!fallback.decision.ref_flag);
    gop.commit(&fallback);
    assert_eq!(gop.next(1, 8, false, |_| true).unwrap().decision.poc, 8);
  }
}
