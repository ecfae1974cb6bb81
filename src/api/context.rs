// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![deny(missing_docs)]

use crate::api::config::*;
use crate::api::internal::*;
use crate::api::util::*;

use crate::frame::*;
use crate::util::Pixel;

use rayon::ThreadPool;
use std::sync::Arc;

/// The encoder context.
///
/// Contains the encoding state.
pub struct Context<T: Pixel> {
  pub(crate) inner: ContextInner<T>,
  pub(crate) pool: Option<Arc<ThreadPool>>,
  pub(crate) is_flushing: bool,
}

impl<T: Pixel> Context<T> {
  /// Allocates and returns a new frame.
  ///
  /// # Examples
  ///
  /// ```
  /// use vencore::prelude::*;
  ///
  /// # fn main() -> Result<(), EncoderStatus> {
  /// let cfg = Config::default();
  /// let ctx: Context<u8> = cfg.new_context()?;
  /// let frame = ctx.new_frame();
  /// # Ok(())
  /// # }
  /// ```
  #[inline]
  pub fn new_frame(&self) -> Frame<T> {
    let config = &self.inner.config;
    FrameAlloc::new(config.width, config.height, config.chroma_sampling)
  }

  /// Sends the frame for encoding.
  ///
  /// The frame is stored in the picture buffer until the GOP schedule
  /// reaches it. With lookahead enabled its intra cost is estimated
  /// right away.
  ///
  /// Passing `None` is equivalent to calling [`flush`].
  ///
  /// # Errors
  ///
  /// - [`EncoderStatus::EnoughData`] if the encoder has been flushed.
  /// - [`EncoderStatus::CapacityExceeded`] if the picture buffer is full;
  ///   call [`receive_packet`] first.
  /// - [`EncoderStatus::InvalidArgument`] if the frame does not have the
  ///   configured dimensions.
  ///
  /// # Examples
  ///
  /// ```
  /// use vencore::prelude::*;
  ///
  /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
  /// let cfg = Config::default();
  /// let mut ctx: Context<u8> = cfg.new_context()?;
  /// let f1 = ctx.new_frame();
  /// let f2 = std::sync::Arc::new(f1.clone());
  ///
  /// // Send the plain frame data
  /// ctx.send_frame(f1)?;
  /// // Send a shared frame
  /// ctx.send_frame(f2)?;
  /// // Flush the encoder, it is equivalent to a call to `flush()`
  /// ctx.send_frame(None)?;
  /// # Ok(())
  /// # }
  /// ```
  ///
  /// [`flush`]: #method.flush
  /// [`receive_packet`]: #method.receive_packet
  #[inline]
  pub fn send_frame<F>(&mut self, frame: F) -> Result<(), EncoderStatus>
  where
    F: IntoFrame<T>,
  {
    let frame = match frame.into() {
      Some(frame) => frame,
      None => {
        self.flush();
        return Ok(());
      }
    };
    if self.is_flushing {
      return Err(EncoderStatus::EnoughData);
    }

    let inner = &mut self.inner;
    match self.pool.as_deref() {
      Some(pool) => pool.install(|| inner.send_frame(frame)),
      None => inner.send_frame(frame),
    }
  }

  /// Encodes the next picture in coding order and returns its NAL units.
  ///
  /// This method is where the main encoding work is done.
  ///
  /// # Errors
  ///
  /// - [`EncoderStatus::NeedMoreInput`] if the next picture of the GOP
  ///   has not been sent yet.
  /// - [`EncoderStatus::NoMoreFrames`] once every picture has been coded
  ///   after a flush.
  /// - [`EncoderStatus::Unexpected`] if a collaborator failed. The
  ///   picture stays buffered and the call can be retried.
  ///
  /// # Examples
  ///
  /// Encoding a single frame:
  ///
  /// ```
  /// use vencore::prelude::*;
  ///
  /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
  /// let cfg = Config::default();
  /// let mut ctx: Context<u8> = cfg.new_context()?;
  /// let frame = ctx.new_frame();
  ///
  /// ctx.send_frame(frame)?;
  /// ctx.flush();
  ///
  /// loop {
  ///     match ctx.receive_packet() {
  ///         Ok(packet) => { /* Mux the packet. */ },
  ///         Err(EncoderStatus::NoMoreFrames) => break,
  ///         Err(err) => Err(err)?,
  ///     }
  /// }
  /// # Ok(())
  /// # }
  /// ```
  ///
  /// Encoding a sequence of frames:
  ///
  /// ```
  /// use std::sync::Arc;
  /// use vencore::prelude::*;
  ///
  /// fn encode_frames(
  ///     ctx: &mut Context<u8>,
  ///     mut frames: impl Iterator<Item=Frame<u8>>
  /// ) -> Result<(), EncoderStatus> {
  ///     loop {
  ///         match ctx.receive_packet() {
  ///             Ok(packet) => { /* Mux the packet. */ },
  ///             Err(EncoderStatus::NeedMoreInput) => {
  ///                 // Push the next frame in, or flush the encoder if
  ///                 // there are no frames left (on None).
  ///                 ctx.send_frame(frames.next().map(Arc::new))?;
  ///             },
  ///             Err(EncoderStatus::NoMoreFrames) => break,
  ///             Err(err) => return Err(err),
  ///         }
  ///     }
  ///
  ///     Ok(())
  /// }
  /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
  /// #     let enc = EncoderConfig {
  /// #         width: 64,
  /// #         height: 64,
  /// #         ..Default::default()
  /// #     };
  /// #     let cfg = Config::new().with_encoder_config(enc);
  /// #     let mut ctx: Context<u8> = cfg.new_context()?;
  /// #
  /// #     let frames = vec![ctx.new_frame(); 10].into_iter();
  /// #     encode_frames(&mut ctx, frames)?;
  /// #
  /// #     Ok(())
  /// # }
  /// ```
  #[inline]
  pub fn receive_packet(&mut self) -> Result<Packet<T>, EncoderStatus> {
    let inner = &mut self.inner;
    match self.pool.as_deref() {
      Some(pool) => pool.install(|| inner.receive_packet()),
      None => inner.receive_packet(),
    }
  }

  /// Flushes the encoder.
  ///
  /// Flushing signals the end of the video. After the encoder has been
  /// flushed, no additional frames are accepted and the buffered ones
  /// are drained by [`receive_packet`].
  ///
  /// [`receive_packet`]: #method.receive_packet
  #[inline]
  pub fn flush(&mut self) {
    self.is_flushing = true;
    self.inner.flush();
  }

  /// Changes a setting of the running encoder.
  ///
  /// Supported keys are `force_output`, `qp`, `i_period`, `deblock` and
  /// `cross_tile_deblock`. A nonzero `force_output` ends the input like
  /// [`flush`]. Changes that alter the parameter sets make the next
  /// packet carry them again.
  ///
  /// # Errors
  ///
  /// - [`EncoderStatus::Unsupported`] for an unknown key.
  /// - [`EncoderStatus::InvalidArgument`] for an out of range value.
  ///
  /// [`flush`]: #method.flush
  pub fn configure(
    &mut self, key: &str, value: i64,
  ) -> Result<(), EncoderStatus> {
    let key: ConfigKey = key.parse()?;
    if key == ConfigKey::ForceOutput {
      if value != 0 {
        self.flush();
      }
      return Ok(());
    }
    self.inner.configure(key, value)
  }

  /// The sequence and picture parameter set NAL units of the stream.
  ///
  /// The first packet, and the first one after a change to them, starts
  /// with the same bytes.
  ///
  /// # Errors
  ///
  /// Returns [`EncoderStatus::Unexpected`] if the entropy coder cannot
  /// write them.
  pub fn parameter_sets(&self) -> Result<Vec<u8>, EncoderStatus> {
    self.inner.parameter_sets()
  }

  /// The current encoder settings.
  pub fn config(&self) -> &EncoderConfig {
    &self.inner.config
  }
}
