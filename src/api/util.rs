// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![deny(missing_docs)]

use crate::api::InvalidConfig;
use crate::encoder::{CollaboratorError, PictureHandle};
use crate::frame::*;
use crate::gop::SliceType;
use crate::stats::EncoderStats;
use crate::util::Pixel;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::*;

/// Status that can be returned by [`Context`] functions.
///
/// [`Context`]: struct.Context.html
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum EncoderStatus {
  /// The encoder needs more pictures before the next one can be coded.
  ///
  /// Emitted by [`Context::receive_packet()`] while the B-frame
  /// reordering delay has not been filled.
  ///
  /// [`Context::receive_packet()`]: struct.Context.html#method.receive_packet
  #[error("need more input")]
  NeedMoreInput,
  /// Input was already ended.
  ///
  /// Emitted by [`Context::send_frame()`] when trying to send a picture
  /// after the encoder has been flushed.
  ///
  /// [`Context::send_frame()`]: struct.Context.html#method.send_frame
  #[error("enough data")]
  EnoughData,
  /// Every pushed picture has been coded.
  ///
  /// Emitted by [`Context::receive_packet()`] once bumping has drained
  /// the picture buffer.
  ///
  /// [`Context::receive_packet()`]: struct.Context.html#method.receive_packet
  #[error("no more frames")]
  NoMoreFrames,
  /// The picture buffer slot for the new picture is still in use.
  #[error("picture buffer full")]
  CapacityExceeded,
  /// A configuration value is out of range.
  #[error("invalid argument")]
  InvalidArgument,
  /// The configuration key is unknown.
  #[error("unsupported")]
  Unsupported,
  /// An allocation failed.
  #[error("out of memory")]
  OutOfMemory,
  /// A collaborator or the thread pool failed.
  ///
  /// The picture being coded stays buffered, so the call can be
  /// repeated.
  #[error("unexpected failure")]
  Unexpected,
}

impl From<InvalidConfig> for EncoderStatus {
  fn from(err: InvalidConfig) -> Self {
    warn!("rejected configuration: {err}");
    EncoderStatus::InvalidArgument
  }
}

impl From<CollaboratorError> for EncoderStatus {
  fn from(err: CollaboratorError) -> Self {
    error!("picture aborted: {err}");
    EncoderStatus::Unexpected
  }
}

/// Represents a packet.
///
/// A packet holds the slice NAL units of one coded picture, preceded by
/// the parameter sets for the first picture of the stream.
#[derive(Debug)]
pub struct Packet<T: Pixel> {
  /// The packet data.
  pub data: Vec<u8>,
  /// The source picture.
  pub source: Option<Arc<Frame<T>>>,
  /// Decoded picture buffer entry holding the reconstruction.
  pub rec: PictureHandle,
  /// Picture order count, equal to the push index of the source.
  pub poc: u64,
  /// Type of the coded picture.
  pub slice_type: SliceType,
  /// Depth in the GOP hierarchy, 0 for intra pictures.
  pub depth: u8,
  /// Temporal layer.
  pub temporal_id: u8,
  /// Whether later pictures may reference this one.
  pub ref_flag: bool,
  /// QP selected for the picture.
  pub qp: u8,
  /// Block-level encoding stats for the picture
  pub enc_stats: EncoderStats,
}

impl<T: Pixel> PartialEq for Packet<T> {
  fn eq(&self, other: &Self) -> bool {
    self.data == other.data
      && self.poc == other.poc
      && self.slice_type == other.slice_type
      && self.qp == other.qp
  }
}

impl<T: Pixel> fmt::Display for Packet<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Picture {} - {} - {} bytes",
      self.poc,
      self.slice_type,
      self.data.len()
    )
  }
}

/// Types which can be converted into frames.
///
/// This trait is used in [`Context::send_frame`] to allow for passing in
/// frames optionally wrapped in `Arc` (to allow for zero-copy, since the
/// encoder keeps frames in `Arc` internally). `None` ends the input.
///
/// [`Context::send_frame`]: struct.Context.html#method.send_frame
pub trait IntoFrame<T: Pixel> {
  /// Converts the type into an optional frame.
  fn into(self) -> Option<Arc<Frame<T>>>;
}

impl<T: Pixel> IntoFrame<T> for Option<Arc<Frame<T>>> {
  fn into(self) -> Option<Arc<Frame<T>>> {
    self
  }
}

impl<T: Pixel> IntoFrame<T> for Arc<Frame<T>> {
  fn into(self) -> Option<Arc<Frame<T>>> {
    Some(self)
  }
}

impl<T: Pixel> IntoFrame<T> for Frame<T> {
  fn into(self) -> Option<Arc<Frame<T>>> {
    Some(Arc::new(self))
  }
}

/// Settings that can be changed on a running encoder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigKey {
  /// Nonzero starts draining the buffered pictures.
  ForceOutput,
  /// Base QP, 0 to 51.
  Qp,
  /// Intra period, a multiple of the GOP size.
  IPeriod,
  /// Deblocking on or off.
  Deblock,
  /// Deblocking across tile edges on or off.
  CrossTileDeblock,
}

impl FromStr for ConfigKey {
  type Err = EncoderStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "force_output" => ConfigKey::ForceOutput,
      "qp" => ConfigKey::Qp,
      "i_period" => ConfigKey::IPeriod,
      "deblock" => ConfigKey::Deblock,
      "cross_tile_deblock" => ConfigKey::CrossTileDeblock,
      _ => return Err(EncoderStatus::Unsupported),
    })
  }
}

impl fmt::Display for ConfigKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ConfigKey::ForceOutput => "force_output",
      ConfigKey::Qp => "qp",
      ConfigKey::IPeriod => "i_period",
      ConfigKey::Deblock => "deblock",
      ConfigKey::CrossTileDeblock => "cross_tile_deblock",
    };
    f.write_str(name)
  }
}
