// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::lookahead::FrameAnalysis;
use crate::api::EncoderStatus;
use crate::frame::Frame;
use crate::gop::SliceDecision;
use crate::util::Pixel;

use std::sync::Arc;

/// A buffered input picture.
pub(crate) struct PictureSlot<T: Pixel> {
  pub frame: Arc<Frame<T>>,
  pub analysis: Option<Arc<FrameAnalysis<T>>>,
  pub push_index: u64,
  /// Set once, when the picture is scheduled.
  pub decision: Option<SliceDecision>,
  pub in_use: bool,
}

/// Fixed-capacity store of input pictures, addressed by push index.
///
/// The slot of a picture is its push index modulo the capacity, so a
/// picture can be found from its POC while older ones wait for their
/// B-frame dependencies.
pub(crate) struct PictureRing<T: Pixel> {
  slots: Box<[Option<PictureSlot<T>>]>,
}

impl<T: Pixel> PictureRing<T> {
  /// # Errors
  ///
  /// Returns `OutOfMemory` if the slot array cannot be allocated.
  pub fn new(capacity: usize) -> Result<Self, EncoderStatus> {
    let mut slots = Vec::new();
    slots
      .try_reserve_exact(capacity)
      .map_err(|_| EncoderStatus::OutOfMemory)?;
    slots.resize_with(capacity, || None);
    Ok(PictureRing { slots: slots.into_boxed_slice() })
  }

  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  fn index(&self, push_index: u64) -> usize {
    (push_index % self.slots.len() as u64) as usize
  }

  /// Stores a picture. Returns its slot index.
  ///
  /// # Errors
  ///
  /// Returns `CapacityExceeded` if the target slot still holds a picture
  /// that has not been released.
  pub fn push(
    &mut self, frame: Arc<Frame<T>>, push_index: u64,
  ) -> Result<usize, EncoderStatus> {
    let idx = self.index(push_index);
    let slot = &mut self.slots[idx];
    if slot.as_ref().is_some_and(|s| s.in_use) {
      return Err(EncoderStatus::CapacityExceeded);
    }
    *slot = Some(PictureSlot {
      frame,
      analysis: None,
      push_index,
      decision: None,
      in_use: true,
    });
    Ok(idx)
  }

  pub fn get(&self, idx: usize) -> Option<&PictureSlot<T>> {
    self.slots.get(idx)?.as_ref()
  }

  pub fn get_mut(&mut self, idx: usize) -> Option<&mut PictureSlot<T>> {
    self.slots.get_mut(idx)?.as_mut()
  }

  /// Slot index of the buffered, not yet released picture with `poc`.
  pub fn find_by_poc(&self, poc: u64) -> Option<usize> {
    let idx = self.index(poc);
    self
      .get(idx)
      .filter(|s| s.in_use && s.push_index == poc)
      .map(|_| idx)
  }

  pub fn get_by_poc(&self, poc: u64) -> Option<&PictureSlot<T>> {
    self.get(self.find_by_poc(poc)?)
  }

  pub fn holds(&self, poc: u64) -> bool {
    self.find_by_poc(poc).is_some()
  }

  /// Frees a slot. Releasing a free slot does nothing.
  pub fn release(&mut self, idx: usize) {
    if let Some(slot) = self.get_mut(idx) {
      slot.in_use = false;
      slot.analysis = None;
    }
  }

  pub fn any_in_use(&self) -> bool {
    self.slots.iter().flatten().any(|s| s.in_use)
  }

  pub fn in_use_count(&self) -> usize {
    self.slots.iter().flatten().filter(|s| s.in_use).count()
  }

  /// Push index of the oldest picture not yet released.
  pub fn oldest_in_use(&self) -> Option<u64> {
    let in_use = self.slots.iter().flatten().filter(|s| s.in_use);
    in_use.map(|s| s.push_index).min()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::frame::FrameAlloc;
  use crate::util::ChromaSampling;

  fn frame() -> Arc<Frame<u8>> {
    Arc::new(FrameAlloc::new(16, 16, ChromaSampling::Cs420))
  }

  #[test]
  fn overfilling_fails() {
    let mut ring = PictureRing::new(3).unwrap();
    for i in 0..3 {
      assert_eq!(ring.push(frame(), i), Ok(i as usize));
    }
    assert_eq!(ring.push(frame(), 3), Err(EncoderStatus::CapacityExceeded));

    ring.release(0);
    assert_eq!(ring.push(frame(), 3), Ok(0));
    assert_eq!(ring.in_use_count(), 3);
  }

  #[test]
  fn lookup_by_poc_checks_the_push_index() {
    let mut ring = PictureRing::new(3).unwrap();
    for i in 0..3 {
      ring.push(frame(), i).unwrap();
    }
    assert!(ring.holds(2));
    assert!(!ring.holds(5));
    assert_eq!(ring.get_by_poc(1).map(|s| s.push_index), Some(1));

    ring.release(1);
    assert!(ring.get_by_poc(1).is_none());
    assert_eq!(ring.oldest_in_use(), Some(0));
  }

  #[test]
  fn release_is_idempotent() {
    let mut ring = PictureRing::new(1).unwrap();
    ring.push(frame(), 0).unwrap();
    ring.release(0);
    ring.release(0);
    assert!(!ring.any_in_use());
    assert_eq!(ring.oldest_in_use(), None);
    // out of range slots are ignored too
    ring.release(7);
  }
}
