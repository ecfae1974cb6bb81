// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! `vencore` is the picture scheduling and parallel execution core of a
//! block-based hybrid video encoder.
//!
//! It owns the GOP decision state machine, the input picture ring, the
//! tile and slice partitioning, the wavefront and tile-parallel CTU
//! engine and the two-pass slice emitter. The per-block coding tools are
//! supplied as collaborators (see [`Collaborators`]); a simple reference
//! set lives in [`basic`].
//!
//! # Basic usage
//!
//! ```
//! use vencore::prelude::*;
//!
//! # fn main() -> Result<(), EncoderStatus> {
//! let enc = EncoderConfig { width: 64, height: 64, ..Default::default() };
//! let cfg = Config::new().with_encoder_config(enc).with_threads(2);
//! let mut ctx: Context<u8> = cfg.new_context()?;
//!
//! for _ in 0..4 {
//!   let frame = ctx.new_frame();
//!   ctx.send_frame(frame)?;
//! }
//! ctx.flush();
//!
//! let mut packets = 0;
//! loop {
//!   match ctx.receive_packet() {
//!     Ok(_packet) => packets += 1,
//!     Err(EncoderStatus::NeedMoreInput) => continue,
//!     Err(EncoderStatus::NoMoreFrames) => break,
//!     Err(e) => return Err(e),
//!   }
//! }
//! assert_eq!(packets, 4);
//! # Ok(())
//! # }
//! ```

#![deny(bare_trait_objects)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::verbose_bit_mask)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::wrong_self_convention)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::upper_case_acronyms)]
#![warn(clippy::doc_link_with_quotes)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate num_derive;

pub(crate) mod ec;
pub(crate) mod header;
pub(crate) mod partition;

mod api;
mod frame;
mod gop;
mod stats;
mod tiling;

pub mod basic;
pub mod encoder;

pub use crate::api::{
  Config, Context, EncoderConfig, EncoderStatus, InvalidConfig, Packet,
};
pub use crate::frame::Frame;
pub use crate::util::Pixel;

/// Commonly used types and traits.
pub mod prelude {
  pub use crate::api::*;
  pub use crate::encoder::{
    Collaborators, CollaboratorError, CtuContext, DeblockFilter,
    EntropyCoder, ModeDecision, PictureHandle, PictureMeta, RateControl,
    RefLists, RefPicManager, WorkerState,
  };
  pub use crate::frame::*;
  pub use crate::gop::{SliceDecision, SliceType};
  pub use crate::partition::*;
  pub use crate::stats::EncoderStats;
  pub use crate::tiling::{SliceLayout, Tile, TilingInfo};
  pub use crate::util::{CastFromPrimitive, ChromaSampling, Pixel};
}

/// Bitstream primitives shared by the entropy coder and the emitter.
pub mod bitstream {
  pub use crate::ec::{BitCursor, ExpGolombWriter};
  pub use crate::encoder::nal::{NalUnitIter, NalUnitWriter};
  pub use crate::header::*;
}

/// Pixel and frame helpers.
pub mod util {
  pub use v_frame::pixel::{CastFromPrimitive, ChromaSampling, Pixel};
}
