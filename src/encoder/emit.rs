// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Slice serialization.
//!
//! Every slice is emitted in three steps: the engine decides and
//! provisionally codes its tiles, the deblocking filter runs over the
//! frozen decisions, and the decisions are coded again into the final
//! payload. The slice header is written first with placeholder values
//! and patched in place once the entry points are known.

use crate::api::EncoderConfig;
use crate::encoder::engine::{serialize_tile, PassInput, TileStream};
use crate::encoder::nal::NalUnitWriter;
use crate::encoder::{
  CollaboratorError, CtuEngine, DeblockFilter, EntropyCoder, ModeDecision,
  PictureParams, Strategy,
};
use crate::frame::{sample_count, Frame};
use crate::header::{NalUnitHeader, NalUnitType, SliceHeaderDraft};
use crate::stats::EncoderStats;
use crate::tiling::{SliceLayout, Tile};
use crate::util::Pixel;

use rayon::prelude::*;

/// Everything needed to encode one picture.
pub(crate) struct PictureJob<'a, T: Pixel> {
  pub config: &'a EncoderConfig,
  pub slices: &'a SliceLayout,
  pub frame: &'a Frame<T>,
  pub picture: &'a PictureParams,
  pub mode_decision: &'a dyn ModeDecision<T>,
  pub entropy: &'a dyn EntropyCoder,
  pub deblock: &'a dyn DeblockFilter,
}

pub(crate) struct EncodedPicture {
  /// One length-prefixed NAL unit per slice.
  pub data: Vec<u8>,
  pub stats: EncoderStats,
}

/// Final payload of one slice.
#[derive(Debug)]
pub(crate) struct CommittedSlice {
  pub payload: Vec<u8>,
  /// Start of every substream after the first, relative to the
  /// payload. Substreams are tiles, or CTU rows under entropy sync.
  pub entry_points: Vec<u32>,
  pub bins: u64,
  pub num_ctu: u32,
}

/// Encodes a picture, one NAL unit per slice.
///
/// # Errors
///
/// Returns the first collaborator failure. Nothing is emitted for a
/// picture that fails.
pub(crate) fn encode_picture<T: Pixel>(
  engine: &mut CtuEngine, tiles: &mut [Tile], job: &PictureJob<'_, T>,
) -> Result<EncodedPicture, CollaboratorError> {
  for tile in tiles.iter_mut() {
    tile.begin_picture(job.picture.qp);
  }
  engine.begin_picture();
  let tiles = &*tiles;

  let input = PassInput {
    frame: job.frame,
    picture: job.picture,
    mode_decision: job.mode_decision,
    entropy: job.entropy,
  };
  let mut provisional = Vec::with_capacity(job.slices.len());
  for slice in &job.slices.slices {
    provisional.push(engine.decision_pass(&input, tiles, slice)?);
  }

  let mut stats = EncoderStats::default();
  if job.config.deblock {
    stats.deblocked_edges = deblock(job, engine, tiles)?;
  }

  let entropy_sync = engine.strategy(tiles.len()) == Strategy::Wavefront;
  let total_ctus = job.config.width_ctus() * job.config.height_ctus();
  let raw_bits = sample_count(
    job.config.width,
    job.config.height,
    job.config.chroma_sampling,
  ) as u64
    * job.config.bit_depth as u64;

  let mut data = Vec::new();
  for (idx, (slice, sizes)) in
    job.slices.slices.iter().zip(&provisional).enumerate()
  {
    let committed =
      commit_slice(job, engine, tiles, slice, sizes, entropy_sync)?;
    let slice_raw_bits =
      raw_bits * u64::from(committed.num_ctu) / total_ctus as u64;
    let zero_words =
      write_slice_nal(&mut data, job, idx, slice, &committed, slice_raw_bits)?;

    stats.bins += committed.bins;
    stats.payload_bytes += committed.payload.len();
    stats.zero_words += zero_words;
    stats.slices += 1;
    stats.tiles += slice.len();
  }

  for decision in engine.decisions.iter() {
    stats.add_decision(decision);
  }
  Ok(EncodedPicture { data, stats })
}

fn deblock<T: Pixel>(
  job: &PictureJob<'_, T>, engine: &CtuEngine, tiles: &[Tile],
) -> Result<u64, CollaboratorError> {
  let decisions = &engine.decisions;
  let inner = tiles
    .par_iter()
    .map(|tile| job.deblock.deblock_tile(tile, decisions))
    .try_reduce(|| 0, |a, b| Ok(a + b))?;
  let boundaries = if job.config.cross_tile_deblock && tiles.len() > 1 {
    job.deblock.deblock_tile_boundaries(tiles, decisions)?
  } else {
    0
  };
  Ok(inner + boundaries)
}

/// Codes the frozen decisions of a slice into its final payload.
///
/// Each tile is written into the byte range its provisional stream
/// occupied; a tile whose replay differs in size or substream layout is
/// an error.
pub(crate) fn commit_slice<T: Pixel>(
  job: &PictureJob<'_, T>, engine: &CtuEngine, tiles: &[Tile],
  slice: &[usize], provisional: &[TileStream], entropy_sync: bool,
) -> Result<CommittedSlice, CollaboratorError> {
  let slice_type = job.picture.decision.slice_type;
  let sizes: Vec<usize> = provisional.iter().map(|s| s.bytes.len()).collect();
  let mut payload = vec![0u8; sizes.iter().sum()];

  let mut ranges = Vec::with_capacity(slice.len());
  let mut rest = payload.as_mut_slice();
  for &size in &sizes {
    let (range, tail) = rest.split_at_mut(size);
    ranges.push(range);
    rest = tail;
  }

  let bins = ranges
    .into_par_iter()
    .zip(slice.par_iter())
    .zip(provisional.par_iter())
    .map(|((range, &t), expected)| {
      let tile = &tiles[t];
      let stream = serialize_tile(
        job.entropy,
        tile,
        slice_type,
        &engine.decisions,
        entropy_sync,
      )?;
      if stream.bytes.len() != range.len() {
        return Err(CollaboratorError::Entropy(format!(
          "tile {} replayed to {} bytes instead of {}",
          tile.index,
          stream.bytes.len(),
          range.len()
        )));
      }
      if stream.substreams != expected.substreams {
        return Err(CollaboratorError::Entropy(format!(
          "tile {} replayed to substreams {:?} instead of {:?}",
          tile.index, stream.substreams, expected.substreams
        )));
      }
      range.copy_from_slice(&stream.bytes);
      Ok(stream.bins)
    })
    .try_reduce(|| 0, |a, b| Ok(a + b))?;

  let substreams: Vec<usize> =
    provisional.iter().flat_map(|s| s.substreams.iter().copied()).collect();
  let entry_points = substreams
    .iter()
    .scan(0u32, |offset, &size| {
      *offset += size as u32;
      Some(*offset)
    })
    .take(substreams.len().saturating_sub(1))
    .collect();
  let num_ctu = slice.iter().map(|&t| tiles[t].ctu_count() as u32).sum();

  Ok(CommittedSlice { payload, entry_points, bins, num_ctu })
}

fn slice_header_template<T: Pixel>(
  job: &PictureJob<'_, T>, idx: usize, slice: &[usize], entry_count: usize,
) -> SliceHeaderDraft {
  let decision = &job.picture.decision;
  SliceHeaderDraft {
    slice_idx: idx as u32,
    slice_type: decision.slice_type,
    poc: decision.poc,
    temporal_id: decision.temporal_id,
    ref_flag: decision.ref_flag,
    qp: job.picture.qp,
    deblock: job.config.deblock,
    tile_ids: slice.iter().map(|&t| t as u32).collect(),
    num_ref_idx: job.picture.ref_lists.num_ref_idx(),
    num_ctu: 0,
    entry_points: vec![0; entry_count],
  }
}

/// Slice header with the payload-dependent fields filled in.
///
/// # Errors
///
/// Fails with `HeaderLength` if the patched header would not fit where
/// the placeholder was written.
pub(crate) fn patch(
  coder: &dyn EntropyCoder, template: &SliceHeaderDraft,
  placeholder_len: usize, num_ctu: u32, entry_points: &[u32],
) -> Result<Vec<u8>, CollaboratorError> {
  let bytes =
    coder.write_slice_header(&template.patched(num_ctu, entry_points))?;
  if bytes.len() != placeholder_len {
    return Err(CollaboratorError::HeaderLength {
      before: placeholder_len,
      after: bytes.len(),
    });
  }
  Ok(bytes)
}

/// Writes the NAL unit of one slice. Returns the number of zero words
/// appended.
fn write_slice_nal<T: Pixel>(
  out: &mut Vec<u8>, job: &PictureJob<'_, T>, idx: usize, slice: &[usize],
  committed: &CommittedSlice, raw_bits: u64,
) -> Result<usize, CollaboratorError> {
  let decision = &job.picture.decision;
  let template =
    slice_header_template(job, idx, slice, committed.entry_points.len());
  let placeholder = job.entropy.write_slice_header(&template)?;

  let header = NalUnitHeader {
    nal_type: NalUnitType::for_slice(decision.slice_type),
    temporal_id: decision.temporal_id,
  };
  let mut nal = NalUnitWriter::begin(out, header)?;
  let header_pos = nal.position();
  nal.extend(&placeholder);
  nal.extend(&committed.payload);

  let patched = patch(
    job.entropy,
    &template,
    placeholder.len(),
    committed.num_ctu,
    &committed.entry_points,
  )?;
  nal.overwrite(header_pos, &patched);

  let words = cabac_zero_words(committed.bins, nal.len() as u64, raw_bits);
  for _ in 0..words {
    nal.extend(&[0, 0]);
  }
  let len = nal.finish();
  trace!(
    "slice {idx} of poc {}: {len} bytes, {} tiles, {words} zero words",
    decision.poc,
    slice.len()
  );
  Ok(words)
}

/// Number of 16-bit zero words to append so that the bin to byte ratio
/// of a slice stays within what a decoder must accept.
///
/// `raw_bits` is the uncompressed size of the samples the slice covers.
pub(crate) fn cabac_zero_words(
  bins: u64, emitted_bytes: u64, raw_bits: u64,
) -> usize {
  let threshold = 32 * emitted_bytes / 3 + raw_bits / 32;
  if bins < threshold {
    return 0;
  }
  let needed = (3 * (bins - raw_bits / 32 + 1) + 31) / 32;
  let shortfall = needed.saturating_sub(emitted_bytes).max(1);
  ((shortfall + 1) / 2) as usize
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::api::*;
  use crate::basic::{
    BoundaryStrengthDeblock, ExpGolombCoder, VarianceModeDecision,
  };
  use crate::ec::BitCursor;
  use crate::encoder::engine::test::{picture, random_frame};
  use crate::encoder::nal::NalUnitIter;
  use crate::gop::SliceType;
  use crate::header::{NalUnitHeader, NAL_HEADER_BYTES};
  use crate::partition::CtuDecision;
  use crate::tiling::TilingInfo;

  use interpolate_name::interpolate_test;
  use pretty_assertions::assert_eq;

  struct Setup {
    config: EncoderConfig,
    layout: SliceLayout,
    tiles: Vec<Tile>,
    engine: CtuEngine,
    frame: Frame<u8>,
  }

  fn setup(config: EncoderConfig, threads: usize) -> Setup {
    let tiling = TilingInfo::from_config(&config).unwrap();
    let layout =
      SliceLayout::new(&config.slices, tiling.tile_count()).unwrap();
    Setup {
      tiles: tiling.tiles(),
      engine: CtuEngine::new(&config, threads).unwrap(),
      frame: random_frame(&config, 3),
      layout,
      config,
    }
  }

  fn encode(
    s: &mut Setup, threads: usize, slice_type: SliceType,
  ) -> Result<EncodedPicture, CollaboratorError> {
    let picture = picture(slice_type);
    let md = VarianceModeDecision::default();
    let coder = ExpGolombCoder::default();
    let deblock = BoundaryStrengthDeblock::default();
    let job = PictureJob {
      config: &s.config,
      slices: &s.layout,
      frame: &s.frame,
      picture: &picture,
      mode_decision: &md,
      entropy: &coder,
      deblock: &deblock,
    };
    let pool =
      rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
    pool.install(|| encode_picture(&mut s.engine, &mut s.tiles, &job))
  }

  fn tiled(cols: usize, rows: usize, slices: SliceConfig) -> EncoderConfig {
    EncoderConfig {
      width: 320,
      height: 192,
      ctu_size: 32,
      tiles: TileConfig::uniform(cols, rows),
      slices,
      ..Default::default()
    }
  }

  #[test]
  fn zero_words_below_threshold() {
    assert_eq!(cabac_zero_words(0, 100, 8000), 0);
    // threshold is 32 * 300 / 3 + 3200 / 32 = 3300
    assert_eq!(cabac_zero_words(3299, 300, 3200), 0);
  }

  #[test]
  fn zero_words_cover_the_shortfall() {
    // needed = ceil(3 * (10000 - 1 + 1) / 32) = 938 bytes
    assert_eq!(cabac_zero_words(10_000, 100, 32), 419);
    // at the threshold at least one word is added
    assert_eq!(cabac_zero_words(3300, 300, 3200), 1);
  }

  #[interpolate_test(one_tile_one_thread, 1, 1, 1)]
  #[interpolate_test(one_tile_wavefront, 1, 1, 4)]
  #[interpolate_test(grid_2x2, 2, 2, 3)]
  #[interpolate_test(grid_3x1, 3, 1, 2)]
  fn lengths_chain_through_the_picture(cols: usize, rows: usize, t: usize) {
    let slices = SliceConfig::Contiguous { num_slices: rows };
    let mut s = setup(tiled(cols, rows, slices), t);
    let picture = encode(&mut s, t, SliceType::I).unwrap();

    let mut iter = NalUnitIter::new(&picture.data);
    let units: Vec<&[u8]> = iter.by_ref().collect();
    assert!(iter.remainder().is_empty());
    assert_eq!(units.len(), rows);
    for unit in units {
      let header = NalUnitHeader::parse(unit).unwrap();
      assert_eq!(header.nal_type, NalUnitType::Idr);
      assert!(unit.len() > NAL_HEADER_BYTES);
    }
    assert_eq!(picture.stats.slices, rows);
    assert_eq!(picture.stats.tiles, cols * rows);
    assert_eq!(picture.stats.ctus, 10 * 6);
  }

  /// Runs the decision pass over the first slice and commits it.
  fn commit_first_slice(
    s: &mut Setup, threads: usize,
  ) -> (Vec<TileStream>, CommittedSlice) {
    let picture = picture(SliceType::P);
    let md = VarianceModeDecision::default();
    let coder = ExpGolombCoder::default();
    let deblock = BoundaryStrengthDeblock::default();
    let job = PictureJob {
      config: &s.config,
      slices: &s.layout,
      frame: &s.frame,
      picture: &picture,
      mode_decision: &md,
      entropy: &coder,
      deblock: &deblock,
    };
    for tile in s.tiles.iter_mut() {
      tile.begin_picture(picture.qp);
    }
    s.engine.begin_picture();
    let input = PassInput {
      frame: &s.frame,
      picture: &picture,
      mode_decision: &md,
      entropy: &coder,
    };
    let slice = &s.layout.slices[0];
    let sync = s.engine.strategy(s.tiles.len()) == Strategy::Wavefront;
    let pool =
      rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
    pool.install(|| {
      let provisional =
        s.engine.decision_pass(&input, &s.tiles, slice).unwrap();
      let committed =
        commit_slice(&job, &s.engine, &s.tiles, slice, &provisional, sync)
          .unwrap();
      (provisional, committed)
    })
  }

  #[test]
  fn entry_points_mark_tile_starts() {
    let mut s = setup(tiled(3, 1, SliceConfig::default()), 2);
    let (provisional, committed) = commit_first_slice(&mut s, 2);

    let mut start = 0;
    let mut starts = Vec::new();
    for (i, stream) in provisional.iter().enumerate() {
      if i > 0 {
        starts.push(start as u32);
      }
      let end = start + stream.bytes.len();
      assert_eq!(&committed.payload[start..end], stream.bytes.as_slice());
      start = end;
    }
    assert_eq!(committed.entry_points, starts);
    assert_eq!(committed.num_ctu, 60);
  }

  #[test]
  fn wavefront_rows_get_entry_points() {
    let mut s = setup(tiled(1, 1, SliceConfig::default()), 4);
    assert_eq!(s.engine.strategy(1), Strategy::Wavefront);
    let (provisional, committed) = commit_first_slice(&mut s, 4);
    let rows = s.tiles[0].height_ctus;
    assert_eq!(rows, 6);

    let sizes = &provisional[0].substreams;
    assert_eq!(sizes.len(), rows);
    assert!(sizes.iter().all(|&size| size > 0));
    assert_eq!(committed.entry_points.len(), rows - 1);

    // every entry point is the start of the next row's substream
    let mut row_start = 0;
    for (y, &size) in sizes.iter().enumerate().take(rows - 1) {
      row_start += size;
      assert_eq!(committed.entry_points[y] as usize, row_start, "row {y}");
    }
    assert_eq!(row_start + sizes[rows - 1], committed.payload.len());

    // a single worker codes the same tile as one substream
    let mut single = setup(tiled(1, 1, SliceConfig::default()), 1);
    let (provisional, committed) = commit_first_slice(&mut single, 1);
    assert_eq!(provisional[0].substreams.len(), 1);
    assert!(committed.entry_points.is_empty());
  }

  /// Reports many more bins than bits, as an arithmetic coder on highly
  /// compressible content would.
  #[derive(Clone, Default)]
  struct DenseBins(ExpGolombCoder);

  impl EntropyCoder for DenseBins {
    fn reset_context(&mut self, qp: u8, slice_type: SliceType) {
      self.0.reset_context(qp, slice_type);
    }

    fn encode_ctu(
      &mut self, decision: &CtuDecision, cursor: &mut BitCursor,
    ) -> Result<(), CollaboratorError> {
      self.0.encode_ctu(decision, cursor)
    }

    fn bin_count(&self) -> u64 {
      256 * self.0.bin_count()
    }

    fn snapshot(&self) -> Box<dyn EntropyCoder> {
      Box::new(self.clone())
    }
  }

  #[interpolate_test(tiles, 2, 2)]
  #[interpolate_test(wavefront, 1, 4)]
  fn dense_slices_are_padded(cols: usize, threads: usize) {
    let mut s = setup(tiled(cols, 1, SliceConfig::default()), threads);
    let picture = picture(SliceType::I);
    let md = VarianceModeDecision::default();
    let coder = DenseBins::default();
    let deblock = BoundaryStrengthDeblock::default();
    let job = PictureJob {
      config: &s.config,
      slices: &s.layout,
      frame: &s.frame,
      picture: &picture,
      mode_decision: &md,
      entropy: &coder,
      deblock: &deblock,
    };
    let pool =
      rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
    let encoded = pool
      .install(|| encode_picture(&mut s.engine, &mut s.tiles, &job))
      .unwrap();

    let words = encoded.stats.zero_words;
    assert!(words > 0);
    let mut iter = NalUnitIter::new(&encoded.data);
    let units: Vec<&[u8]> = iter.by_ref().collect();
    assert!(iter.remainder().is_empty());
    assert_eq!(units.len(), 1);
    let unit = units[0];
    let padding = &unit[unit.len() - 2 * words..];
    assert!(padding.iter().all(|&b| b == 0));
    assert!(
      unit.len() > NAL_HEADER_BYTES + encoded.stats.payload_bytes + 2 * words
    );
  }

  #[test]
  fn patch_rejects_a_length_change() {
    let coder = ExpGolombCoder::default();
    let template = SliceHeaderDraft {
      slice_idx: 0,
      slice_type: SliceType::I,
      poc: 0,
      temporal_id: 0,
      ref_flag: true,
      qp: 30,
      deblock: false,
      tile_ids: vec![0, 1],
      num_ref_idx: [0, 0],
      num_ctu: 0,
      entry_points: vec![0],
    };
    let len = coder.write_slice_header(&template).unwrap().len();
    assert_eq!(patch(&coder, &template, len, 12, &[345]).unwrap().len(), len);
    assert!(matches!(
      patch(&coder, &template, len + 1, 12, &[345]),
      Err(CollaboratorError::HeaderLength { .. })
    ));
  }

  #[test]
  fn output_does_not_depend_on_tile_workers() {
    let cfg = tiled(2, 2, SliceConfig::default());
    let mut one = setup(cfg.clone(), 1);
    let mut four = setup(cfg, 4);
    let a = encode(&mut one, 1, SliceType::B).unwrap();
    let b = encode(&mut four, 4, SliceType::B).unwrap();
    assert_eq!(a.data, b.data);
    assert_eq!(a.stats, b.stats);
  }

  #[test]
  fn deblocking_can_be_disabled() {
    let mut cfg = tiled(2, 1, SliceConfig::default());
    let mut s = setup(cfg.clone(), 2);
    let stats = encode(&mut s, 2, SliceType::I).unwrap().stats;
    assert!(stats.deblocked_edges > 0);

    cfg.deblock = false;
    let mut s = setup(cfg, 2);
    let stats = encode(&mut s, 2, SliceType::I).unwrap().stats;
    assert_eq!(stats.deblocked_edges, 0);
  }
}
