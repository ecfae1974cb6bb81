// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Interfaces of the per-block coding tools driven by the engine.
//!
//! Mode decision and entropy coding are called from worker threads and
//! only get shared access to themselves; per-thread state lives in
//! [`WorkerState`] or in the coder instance each worker forks off the
//! prototype with [`EntropyCoder::snapshot`].

use crate::api::{EncoderConfig, MAX_REFS};
use crate::basic;
use crate::ec::BitCursor;
use crate::encoder::nal::NalUnitWriter;
use crate::encoder::{CtuContext, DecisionMap, WorkerState};
use crate::gop::{SliceDecision, SliceType};
use crate::header::*;
use crate::partition::{CodingTree, CtuDecision};
use crate::tiling::Tile;
use crate::util::Pixel;

use arrayvec::ArrayVec;
use bitstream_io::{BigEndian, BitWriter};
use thiserror::Error;

use std::io;
use std::sync::Arc;

/// Failure reported by a collaborator, or by the engine while driving
/// one. Aborts the picture being encoded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CollaboratorError {
  #[error("mode decision failed at CTU {addr}: {reason}")]
  ModeDecision { addr: usize, reason: String },
  #[error("entropy coding failed: {0}")]
  Entropy(String),
  #[error("deblocking failed on tile {tile}: {reason}")]
  Deblock { tile: usize, reason: String },
  #[error("reference picture manager failed: {0}")]
  RefPics(String),
  #[error("no frozen decision for CTU {0}")]
  MissingDecision(usize),
  #[error("slice header changed length from {before} to {after} bytes")]
  HeaderLength { before: usize, after: usize },
  #[error("a wavefront dependency was abandoned")]
  Aborted,
  #[error("bitstream write failed")]
  Io(#[from] io::Error),
}

/// Reconstructed picture owned by the reference picture manager.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PictureHandle(pub usize);

/// Reference POCs per list, closest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefLists {
  pub l0: ArrayVec<u64, MAX_REFS>,
  pub l1: ArrayVec<u64, MAX_REFS>,
}

impl RefLists {
  pub fn num_ref_idx(&self) -> [u8; 2] {
    [self.l0.len() as u8, self.l1.len() as u8]
  }
}

/// Everything the CTU collaborators know about the current picture.
#[derive(Clone, Debug)]
pub struct PictureParams {
  pub decision: SliceDecision,
  pub qp: u8,
  pub ref_lists: RefLists,
  pub handle: PictureHandle,
}

/// Input of the rate controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PictureMeta {
  pub decision: SliceDecision,
  pub base_qp: u8,
  /// Mean lookahead intra cost per 16x16 block, if analysis ran.
  pub complexity: Option<f64>,
}

/// Per-CTU mode decision.
pub trait ModeDecision<T: Pixel>: Send + Sync {
  /// Prepares per-worker state before the CTU is analyzed.
  ///
  /// # Errors
  ///
  /// Any error aborts the picture.
  fn init_ctu(
    &self, _ctx: &CtuContext<'_, T>, _worker: &mut WorkerState,
  ) -> Result<(), CollaboratorError> {
    Ok(())
  }

  /// Chooses the coding tree of the CTU.
  ///
  /// # Errors
  ///
  /// Any error aborts the picture.
  fn analyze_ctu(
    &self, ctx: &CtuContext<'_, T>, worker: &mut WorkerState,
  ) -> Result<CodingTree, CollaboratorError>;

  /// Last chance to adjust the decision before it is frozen.
  ///
  /// # Errors
  ///
  /// Any error aborts the picture.
  fn finalize_ctu(
    &self, _ctx: &CtuContext<'_, T>, _worker: &mut WorkerState,
    _decision: &mut CtuDecision,
  ) -> Result<(), CollaboratorError> {
    Ok(())
  }
}

/// Serializes frozen decisions.
///
/// Coding must be a pure function of the context state and the
/// decisions: the emitter replays the decisions of every tile from a
/// freshly reset context and expects the same bytes.
pub trait EntropyCoder: Send + Sync {
  /// Resets the adaptive state at the start of a tile.
  fn reset_context(&mut self, qp: u8, slice_type: SliceType);

  /// # Errors
  ///
  /// Fails if the decision cannot be represented.
  fn encode_ctu(
    &mut self, decision: &CtuDecision, cursor: &mut BitCursor,
  ) -> Result<(), CollaboratorError>;

  /// Marks the end of a tile.
  ///
  /// # Errors
  ///
  /// Propagates cursor write errors.
  fn end_of_tile(
    &mut self, cursor: &mut BitCursor,
  ) -> Result<(), CollaboratorError> {
    cursor.write_bit(true)?;
    Ok(())
  }

  /// Terminates the current substream.
  ///
  /// # Errors
  ///
  /// Propagates cursor write errors.
  fn flush(
    &mut self, cursor: &mut BitCursor,
  ) -> Result<(), CollaboratorError> {
    cursor.byte_align()?;
    Ok(())
  }

  /// Bins coded since the last [`reset_context`](Self::reset_context).
  fn bin_count(&self) -> u64;

  /// Copy of the coder, including its adaptive state.
  fn snapshot(&self) -> Box<dyn EntropyCoder>;

  /// # Errors
  ///
  /// Fails if a header field does not fit its syntax element.
  fn write_slice_header(
    &self, draft: &SliceHeaderDraft,
  ) -> Result<Vec<u8>, CollaboratorError> {
    Ok(slice_header_bytes(draft)?)
  }

  /// Sequence and picture parameter set NAL units, length prefixed.
  ///
  /// # Errors
  ///
  /// Fails if a parameter does not fit its syntax element.
  fn write_parameter_sets(
    &self, sets: &ParameterSets,
  ) -> Result<Vec<u8>, CollaboratorError> {
    let mut out = Vec::new();

    let mut bw = BitWriter::endian(Vec::new(), BigEndian);
    bw.write_sequence_header(&sets.sps)?;
    let header = NalUnitHeader { nal_type: NalUnitType::Sps, temporal_id: 0 };
    let mut nal = NalUnitWriter::begin(&mut out, header)?;
    nal.extend(&bw.into_writer());
    nal.finish();

    let mut bw = BitWriter::endian(Vec::new(), BigEndian);
    bw.write_picture_parameter_set(&sets.pps)?;
    let header = NalUnitHeader { nal_type: NalUnitType::Pps, temporal_id: 0 };
    let mut nal = NalUnitWriter::begin(&mut out, header)?;
    nal.extend(&bw.into_writer());
    nal.finish();

    Ok(out)
  }
}

/// In-loop deblocking over frozen decisions.
pub trait DeblockFilter: Send + Sync {
  /// Filters the edges inside `tile`. Returns the number of edges
  /// filtered.
  ///
  /// # Errors
  ///
  /// Any error aborts the picture.
  fn deblock_tile(
    &self, tile: &Tile, decisions: &DecisionMap,
  ) -> Result<u64, CollaboratorError>;

  /// Filters the edges shared by neighbouring tiles. Runs after every
  /// tile has been filtered.
  ///
  /// # Errors
  ///
  /// Any error aborts the picture.
  fn deblock_tile_boundaries(
    &self, _tiles: &[Tile], _decisions: &DecisionMap,
  ) -> Result<u64, CollaboratorError> {
    Ok(0)
  }
}

/// Picture-level QP selection.
pub trait RateControl: Send {
  fn frame_qp(&mut self, meta: &PictureMeta) -> u8;

  /// Reports the size of an encoded picture.
  fn update(&mut self, _meta: &PictureMeta, _qp: u8, _bits: u64) {}
}

/// Decoded picture buffer.
pub trait RefPicManager: Send {
  /// # Errors
  ///
  /// Fails when no buffer is available.
  fn alloc_empty_picture(
    &mut self,
  ) -> Result<PictureHandle, CollaboratorError>;

  /// Stores the reconstruction of an encoded picture.
  ///
  /// # Errors
  ///
  /// Fails if the handle is unknown.
  fn put_decoded_picture(
    &mut self, handle: PictureHandle, poc: u64, temporal_id: u8,
    ref_flag: bool,
  ) -> Result<(), CollaboratorError>;

  fn build_ref_lists(
    &self, slice_type: SliceType, poc: u64, temporal_id: u8,
  ) -> RefLists;
}

/// The set of collaborators a session drives.
pub struct Collaborators<T: Pixel> {
  pub mode_decision: Arc<dyn ModeDecision<T>>,
  pub entropy: Box<dyn EntropyCoder>,
  pub deblock: Arc<dyn DeblockFilter>,
  pub rate_control: Box<dyn RateControl>,
  pub ref_pics: Box<dyn RefPicManager>,
}

impl<T: Pixel> Collaborators<T> {
  /// The reference collaborators from [`basic`].
  pub fn basic(config: &EncoderConfig) -> Self {
    Collaborators {
      mode_decision: Arc::new(basic::VarianceModeDecision::default()),
      entropy: Box::new(basic::ExpGolombCoder::default()),
      deblock: Arc::new(basic::BoundaryStrengthDeblock::default()),
      rate_control: Box::new(basic::ConstantQp::default()),
      ref_pics: Box::new(basic::SlidingWindowDpb::new(config.max_refs)),
    }
  }
}
