// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::lookahead::FrameAnalysis;
use crate::api::ring::PictureRing;
use crate::api::*;
use crate::encoder::emit::{encode_picture, PictureJob};
use crate::encoder::*;
use crate::frame::Frame;
use crate::gop::{GopScheduler, SliceType};
use crate::header::{ParameterSets, PictureParameterSet, SequenceHeader};
use crate::tiling::{SliceLayout, Tile, TilingInfo};
use crate::util::{ChromaSampling, Pixel};
use v_frame::math::Fixed;

use std::sync::Arc;

/// Where the session is in its end-of-stream handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushState {
  /// Accepting input.
  Encoding,
  /// Input ended; draining the buffered pictures.
  Bumping,
  /// Every picture has been coded.
  Done,
}

pub(crate) struct ContextInner<T: Pixel> {
  pub(crate) config: EncoderConfig,
  ring: PictureRing<T>,
  gop: GopScheduler,
  pub(crate) state: FlushState,
  tiling: TilingInfo,
  tiles: Vec<Tile>,
  slices: SliceLayout,
  engine: CtuEngine,
  collaborators: Collaborators<T>,
  param_sets: ParameterSets,
  /// Cleared whenever the parameter sets change.
  param_sets_sent: bool,
  last_intra_poc: Option<u64>,
  pub(crate) pushed_count: u64,
  pub(crate) encoded_count: u64,
  pub(crate) total_pushed_at_flush: Option<u64>,
}

impl<T: Pixel> ContextInner<T> {
  /// # Errors
  ///
  /// Returns `InvalidArgument` for a tile or slice layout that does not
  /// fit the picture and `OutOfMemory` if the picture buffer or the CTU
  /// maps cannot be allocated.
  pub fn new(
    config: &EncoderConfig, workers: usize, collaborators: Collaborators<T>,
  ) -> Result<Self, EncoderStatus> {
    let gop = GopScheduler::new(config.gop_config());
    let ring = PictureRing::new(gop.config().ring_capacity())?;
    let tiling = TilingInfo::from_config(config)?;
    let slices = SliceLayout::new(&config.slices, tiling.tile_count())?;
    let engine = CtuEngine::new(config, workers)?;
    let entropy_sync =
      engine.strategy(tiling.tile_count()) == Strategy::Wavefront;
    let param_sets =
      build_parameter_sets(config, &tiling, &slices, entropy_sync);

    Ok(ContextInner {
      config: config.clone(),
      ring,
      gop,
      state: FlushState::Encoding,
      tiles: tiling.tiles(),
      tiling,
      slices,
      engine,
      collaborators,
      param_sets,
      param_sets_sent: false,
      last_intra_poc: None,
      pushed_count: 0,
      encoded_count: 0,
      total_pushed_at_flush: None,
    })
  }

  pub fn send_frame(
    &mut self, frame: Arc<Frame<T>>,
  ) -> Result<(), EncoderStatus> {
    let luma = &frame.planes[0].cfg;
    // frames are allocated with 8-aligned luma
    let alloc_w = self.config.width.align_power_of_two(3);
    let alloc_h = self.config.height.align_power_of_two(3);
    if luma.width != alloc_w || luma.height != alloc_h {
      warn!(
        "picture is {}x{}, expected {}x{}",
        luma.width, luma.height, alloc_w, alloc_h
      );
      return Err(EncoderStatus::InvalidArgument);
    }

    let (width, height) = (self.config.width, self.config.height);
    let analysis = self
      .config
      .lookahead
      .then(|| Arc::new(FrameAnalysis::new(&frame, width, height)));
    let idx = self.ring.push(frame, self.pushed_count)?;
    if let Some(slot) = self.ring.get_mut(idx) {
      slot.analysis = analysis;
    }
    trace!("pushed picture {} into slot {}", self.pushed_count, idx);
    self.pushed_count += 1;
    Ok(())
  }

  /// Ends the input. Later calls do nothing.
  pub fn flush(&mut self) {
    if self.state == FlushState::Encoding {
      debug!(
        "input ended after {} pictures, {} buffered",
        self.pushed_count,
        self.ring.in_use_count()
      );
      self.state = FlushState::Bumping;
      self.total_pushed_at_flush = Some(self.pushed_count);
    }
  }

  pub fn receive_packet(&mut self) -> Result<Packet<T>, EncoderStatus> {
    match self.state {
      FlushState::Done => return Err(EncoderStatus::NoMoreFrames),
      FlushState::Bumping if !self.ring.any_in_use() => {
        debug!("bumping done after {} pictures", self.encoded_count);
        self.state = FlushState::Done;
        return Err(EncoderStatus::NoMoreFrames);
      }
      _ => {}
    }

    let bumping = self.state == FlushState::Bumping;
    if self.gop.needs_more_input(self.pushed_count, bumping) {
      return Err(EncoderStatus::NeedMoreInput);
    }

    let ring = &self.ring;
    let next = self.gop.next(
      self.encoded_count,
      self.pushed_count,
      bumping,
      |poc| ring.holds(poc),
    );
    let pending = match next {
      Some(pending) => pending,
      None if bumping => {
        let poc = ring.oldest_in_use().ok_or(EncoderStatus::Unexpected)?;
        warn!("no GOP position left for picture {poc}, coding it as is");
        self.gop.fallback(poc)
      }
      None => return Err(EncoderStatus::NeedMoreInput),
    };
    let decision = pending.decision;
    let slot_idx =
      ring.find_by_poc(decision.poc).ok_or(EncoderStatus::Unexpected)?;

    let prefix = if self.param_sets_sent {
      Vec::new()
    } else {
      self.parameter_sets()?
    };

    let slot = self.ring.get_mut(slot_idx).ok_or(EncoderStatus::Unexpected)?;
    slot.decision.get_or_insert(decision);
    let frame = slot.frame.clone();
    let complexity = slot.analysis.as_ref().and_then(|a| a.mean_cost());

    let meta = PictureMeta { decision, base_qp: self.config.qp, complexity };
    let collab = &mut self.collaborators;
    let qp = collab.rate_control.frame_qp(&meta);
    let handle = collab.ref_pics.alloc_empty_picture()?;
    let ref_lists = collab.ref_pics.build_ref_lists(
      decision.slice_type,
      decision.poc,
      decision.temporal_id,
    );
    let picture = PictureParams { decision, qp, ref_lists, handle };

    let job = PictureJob {
      config: &self.config,
      slices: &self.slices,
      frame: &frame,
      picture: &picture,
      mode_decision: collab.mode_decision.as_ref(),
      entropy: collab.entropy.as_ref(),
      deblock: collab.deblock.as_ref(),
    };
    let encoded = encode_picture(&mut self.engine, &mut self.tiles, &job)?;

    collab.ref_pics.put_decoded_picture(
      handle,
      decision.poc,
      decision.temporal_id,
      decision.ref_flag,
    )?;
    let bits = 8 * encoded.data.len() as u64;
    collab.rate_control.update(&meta, qp, bits);

    self.gop.commit(&pending);
    self.ring.release(slot_idx);
    self.encoded_count += 1;
    self.param_sets_sent = true;
    if decision.slice_type == SliceType::I {
      if let Some(last) = self.last_intra_poc {
        trace!("intra period {}", decision.poc.abs_diff(last));
      }
      self.last_intra_poc = Some(decision.poc);
    }

    let mut data = prefix;
    data.extend_from_slice(&encoded.data);
    debug!(
      "poc {} {} depth {} qp {}: {} bytes",
      decision.poc,
      decision.slice_type,
      decision.depth,
      qp,
      data.len()
    );

    Ok(Packet {
      data,
      source: Some(frame),
      rec: handle,
      poc: decision.poc,
      slice_type: decision.slice_type,
      depth: decision.depth,
      temporal_id: decision.temporal_id,
      ref_flag: decision.ref_flag,
      qp,
      enc_stats: encoded.stats,
    })
  }

  /// Applies a runtime setting. `force_output` is handled by the caller.
  pub fn configure(
    &mut self, key: ConfigKey, value: i64,
  ) -> Result<(), EncoderStatus> {
    let invalid = || {
      warn!("invalid value {value} for {key}");
      EncoderStatus::InvalidArgument
    };
    let flag = || match value {
      0 => Ok(false),
      1 => Ok(true),
      _ => Err(invalid()),
    };

    match key {
      ConfigKey::ForceOutput => {}
      ConfigKey::Qp => {
        self.config.qp = u8::try_from(value)
          .ok()
          .filter(|&qp| qp <= MAX_QP)
          .ok_or_else(invalid)?;
        self.refresh_parameter_sets();
      }
      ConfigKey::IPeriod => {
        let gop_size = self.config.gop_size;
        let i_period = usize::try_from(value)
          .ok()
          .filter(|&p| gop_size == 1 || p % gop_size == 0)
          .ok_or_else(invalid)?;
        self.config.i_period = i_period;
        self.gop.set_i_period(i_period as u64);
        self.refresh_parameter_sets();
      }
      ConfigKey::Deblock => {
        self.config.deblock = flag()?;
        self.refresh_parameter_sets();
      }
      ConfigKey::CrossTileDeblock => {
        self.config.cross_tile_deblock = flag()?;
        self.refresh_parameter_sets();
      }
    }
    debug!("{key} set to {value}");
    Ok(())
  }

  fn refresh_parameter_sets(&mut self) {
    let entropy_sync =
      self.engine.strategy(self.tiling.tile_count()) == Strategy::Wavefront;
    let sets = build_parameter_sets(
      &self.config,
      &self.tiling,
      &self.slices,
      entropy_sync,
    );
    if sets != self.param_sets {
      self.param_sets = sets;
      self.param_sets_sent = false;
    }
  }

  /// Sequence and picture parameter set NAL units.
  pub fn parameter_sets(&self) -> Result<Vec<u8>, EncoderStatus> {
    Ok(self.collaborators.entropy.write_parameter_sets(&self.param_sets)?)
  }
}

fn build_parameter_sets(
  config: &EncoderConfig, tiling: &TilingInfo, slices: &SliceLayout,
  entropy_sync: bool,
) -> ParameterSets {
  let to_u32 = |v: &[usize]| v.iter().map(|&x| x as u32).collect();
  let gop = config.gop_config();
  ParameterSets {
    sps: SequenceHeader {
      width: config.width as u32,
      height: config.height as u32,
      bit_depth: config.bit_depth as u8,
      chroma_format_idc: match config.chroma_sampling {
        ChromaSampling::Cs400 => 0,
        ChromaSampling::Cs420 => 1,
        ChromaSampling::Cs422 => 2,
        ChromaSampling::Cs444 => 3,
      },
      ctu_size_log2: config.ctu_size_log2() as u8,
      gop_size: gop.gop_size as u32,
      hierarchical: gop.hierarchical,
      i_period: gop.i_period as u32,
      max_refs: config.max_refs as u8,
    },
    pps: PictureParameterSet {
      tile_cols: tiling.cols() as u32,
      tile_rows: tiling.rows() as u32,
      uniform_spacing: tiling.uniform,
      col_widths: to_u32(&tiling.col_widths),
      row_heights: to_u32(&tiling.row_heights),
      arbitrary_slices: slices.arbitrary,
      deblock: config.deblock,
      cross_tile_deblock: config.cross_tile_deblock,
      entropy_sync,
      init_qp: config.qp,
    },
  }
}
