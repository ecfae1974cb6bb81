// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Picture encoding: the parallel CTU engine, the collaborator traits it
//! drives and the slice emitter.

mod collaborators;
pub(crate) mod emit;
pub(crate) mod engine;
pub mod nal;

pub use self::collaborators::*;
pub use self::engine::{
  CtuContext, DecisionMap, Strategy, SyncFlags, WorkerState,
};

pub(crate) use self::engine::CtuEngine;
