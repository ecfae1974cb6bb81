// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::MAX_REFS;
use crate::encoder::{
  CollaboratorError, PictureHandle, RefLists, RefPicManager,
};
use crate::gop::SliceType;

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StoredPicture {
  handle: PictureHandle,
  poc: u64,
  temporal_id: u8,
}

/// Keeps the last `max_refs` reference pictures in decoding order.
///
/// The buffer pool holds one picture more than the window, for the
/// picture being coded. Lists are ordered by POC distance: past pictures
/// lead list 0 and future pictures lead list 1.
#[derive(Debug, Clone)]
pub struct SlidingWindowDpb {
  max_refs: usize,
  /// Oldest first.
  refs: VecDeque<StoredPicture>,
  free: Vec<PictureHandle>,
  allocated: usize,
  /// Handed out by `alloc_empty_picture`, not yet stored.
  pending: Option<PictureHandle>,
}

impl SlidingWindowDpb {
  pub fn new(max_refs: usize) -> Self {
    let max_refs = max_refs.min(MAX_REFS);
    SlidingWindowDpb {
      max_refs,
      refs: VecDeque::with_capacity(max_refs + 1),
      free: Vec::new(),
      allocated: 0,
      pending: None,
    }
  }

  /// Number of picture buffers in the pool.
  pub const fn capacity(&self) -> usize {
    self.max_refs + 1
  }

  /// POCs of the stored reference pictures, oldest first.
  pub fn ref_pocs(&self) -> impl Iterator<Item = u64> + '_ {
    self.refs.iter().map(|r| r.poc)
  }
}

impl RefPicManager for SlidingWindowDpb {
  /// Hands out the same buffer until it is stored, so a picture whose
  /// encode failed reuses it on the next attempt.
  fn alloc_empty_picture(
    &mut self,
  ) -> Result<PictureHandle, CollaboratorError> {
    if let Some(handle) = self.pending {
      return Ok(handle);
    }
    let handle = match self.free.pop() {
      Some(handle) => handle,
      None if self.allocated < self.capacity() => {
        self.allocated += 1;
        PictureHandle(self.allocated - 1)
      }
      None => {
        return Err(CollaboratorError::RefPics(format!(
          "all {} picture buffers are in use",
          self.capacity()
        )))
      }
    };
    self.pending = Some(handle);
    Ok(handle)
  }

  fn put_decoded_picture(
    &mut self, handle: PictureHandle, poc: u64, temporal_id: u8,
    ref_flag: bool,
  ) -> Result<(), CollaboratorError> {
    if self.pending != Some(handle) {
      return Err(CollaboratorError::RefPics(format!(
        "{handle:?} was not allocated"
      )));
    }
    self.pending = None;

    if !ref_flag {
      self.free.push(handle);
      return Ok(());
    }
    self.refs.push_back(StoredPicture { handle, poc, temporal_id });
    if self.refs.len() > self.max_refs {
      if let Some(oldest) = self.refs.pop_front() {
        trace!("poc {} leaves the reference window", oldest.poc);
        self.free.push(oldest.handle);
      }
    }
    Ok(())
  }

  fn build_ref_lists(
    &self, slice_type: SliceType, poc: u64, temporal_id: u8,
  ) -> RefLists {
    if slice_type == SliceType::I {
      return RefLists::default();
    }

    let usable = || {
      self.refs.iter().filter(|r| r.temporal_id <= temporal_id && r.poc != poc)
    };
    let mut past: Vec<u64> =
      usable().filter(|r| r.poc < poc).map(|r| r.poc).collect();
    let mut future: Vec<u64> =
      usable().filter(|r| r.poc > poc).map(|r| r.poc).collect();
    past.sort_unstable_by(|a, b| b.cmp(a));
    future.sort_unstable();

    let n = self.max_refs;
    let l0 = past.iter().chain(&future).take(n).copied().collect();
    let l1 = match slice_type {
      SliceType::B => future.iter().chain(&past).take(n).copied().collect(),
      _ => Default::default(),
    };
    RefLists { l0, l1 }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  use pretty_assertions::assert_eq;

  fn store(dpb: &mut SlidingWindowDpb, poc: u64, tid: u8, ref_flag: bool) {
    let handle = dpb.alloc_empty_picture().unwrap();
    dpb.put_decoded_picture(handle, poc, tid, ref_flag).unwrap();
  }

  #[test]
  fn window_slides() {
    let mut dpb = SlidingWindowDpb::new(2);
    store(&mut dpb, 0, 0, true);
    store(&mut dpb, 8, 0, true);
    store(&mut dpb, 7, 3, false);
    store(&mut dpb, 4, 1, true);
    assert_eq!(dpb.ref_pocs().collect::<Vec<_>>(), [8, 4]);
  }

  #[test]
  fn lists_are_ordered_by_distance() {
    let mut dpb = SlidingWindowDpb::new(4);
    for (poc, tid) in [(0, 0), (8, 0), (4, 1), (6, 2)] {
      store(&mut dpb, poc, tid, true);
    }

    let b = dpb.build_ref_lists(SliceType::B, 5, 3);
    assert_eq!(b.l0.as_slice(), [4, 0, 6, 8]);
    assert_eq!(b.l1.as_slice(), [6, 8, 4, 0]);

    let p = dpb.build_ref_lists(SliceType::P, 5, 3);
    assert_eq!(p.l0.as_slice(), [4, 0, 6, 8]);
    assert!(p.l1.is_empty());

    // Higher temporal layers are not visible from lower ones.
    let low = dpb.build_ref_lists(SliceType::B, 2, 1);
    assert_eq!(low.l0.as_slice(), [0, 4, 8]);
    assert_eq!(low.num_ref_idx(), [3, 3]);

    assert_eq!(dpb.build_ref_lists(SliceType::I, 5, 3), RefLists::default());
  }

  #[test]
  fn failed_pictures_reuse_their_buffer() {
    let mut dpb = SlidingWindowDpb::new(1);
    let first = dpb.alloc_empty_picture().unwrap();
    assert_eq!(dpb.alloc_empty_picture().unwrap(), first);
    dpb.put_decoded_picture(first, 0, 0, true).unwrap();

    for poc in 1..10 {
      store(&mut dpb, poc, 0, true);
    }
    assert!(dpb.allocated <= dpb.capacity());
  }

  #[test]
  fn unknown_handles_are_rejected() {
    let mut dpb = SlidingWindowDpb::new(2);
    assert!(matches!(
      dpb.put_decoded_picture(PictureHandle(5), 0, 0, true),
      Err(CollaboratorError::RefPics(_))
    ));
  }
}
