// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Reference collaborators.
//!
//! Simple coding tools driving the whole scheduling and emission path.
//! [`Collaborators::basic`](crate::encoder::Collaborators::basic)
//! bundles them.

mod coder;
mod deblock;
mod mode;
mod rc;
mod refs;

pub use self::coder::ExpGolombCoder;
pub use self::deblock::{boundary_strength, BoundaryStrengthDeblock};
pub use self::mode::VarianceModeDecision;
pub use self::rc::ConstantQp;
pub use self::refs::SlidingWindowDpb;
