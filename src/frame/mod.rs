// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::util::{ChromaSampling, Pixel};

pub use v_frame::frame::Frame;
pub use v_frame::plane::{Plane, PlaneConfig, PlaneOffset};

/// Luma padding applied to frames allocated by the encoder.
const FRAME_MARGIN: usize = 16;

/// Frame allocation helper.
pub trait FrameAlloc {
  /// Allocates a frame with the padding the encoder expects.
  fn new(
    width: usize, height: usize, chroma_sampling: ChromaSampling,
  ) -> Self;
}

impl<T: Pixel> FrameAlloc for Frame<T> {
  fn new(
    width: usize, height: usize, chroma_sampling: ChromaSampling,
  ) -> Self {
    Frame::new_with_padding(width, height, chroma_sampling, FRAME_MARGIN)
  }
}

/// Number of samples, over all planes, of a picture with the given
/// luma dimensions.
pub(crate) fn sample_count(
  width: usize, height: usize, chroma_sampling: ChromaSampling,
) -> usize {
  let (cw, ch) = chroma_sampling.get_chroma_dimensions(width, height);
  width * height + 2 * cw * ch
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn sample_count_by_sampling() {
    assert_eq!(sample_count(64, 32, ChromaSampling::Cs400), 64 * 32);
    assert_eq!(sample_count(64, 32, ChromaSampling::Cs420), 64 * 32 * 3 / 2);
    assert_eq!(sample_count(64, 32, ChromaSampling::Cs422), 64 * 32 * 2);
    assert_eq!(sample_count(64, 32, ChromaSampling::Cs444), 64 * 32 * 3);
  }
}
