// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Parallel CTU decision pass.
//!
//! Two strategies share the same per-CTU protocol: wavefront, where
//! every worker codes every `n`-th CTU row of the single tile and waits
//! on the top-right neighbour, and tile-parallel, where each worker owns
//! whole tiles. Worker 0 always runs on the calling thread.

use crate::api::{EncoderConfig, EncoderStatus};
use crate::ec::BitCursor;
use crate::encoder::{
  CollaboratorError, EntropyCoder, ModeDecision, PictureParams,
};
use crate::frame::Frame;
use crate::gop::SliceType;
use crate::partition::{BlockRect, CtuDecision};
use crate::tiling::Tile;
use crate::util::Pixel;

use crossbeam::utils::Backoff;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, OnceLock, PoisonError};

/// Per-thread scratch state.
pub struct WorkerState {
  pub thread_idx: usize,
  pub tile_idx: usize,
  /// Picture coordinates of the CTU being coded.
  pub ctu_x: usize,
  pub ctu_y: usize,
  /// Entropy context saved after the second CTU of the last row coded
  /// in wavefront mode.
  pub(crate) saved_context: Option<Box<dyn EntropyCoder>>,
  /// Free for use by the mode decision.
  pub scratch: Vec<u32>,
}

impl WorkerState {
  pub fn new(thread_idx: usize) -> Self {
    WorkerState {
      thread_idx,
      tile_idx: 0,
      ctu_x: 0,
      ctu_y: 0,
      saved_context: None,
      scratch: Vec::new(),
    }
  }
}

/// Per-CTU completion flags for the wavefront.
///
/// Each flag goes from pending to done once per picture. Waiters spin
/// briefly and then park on a condition variable.
pub struct SyncFlags {
  flags: Box<[AtomicBool]>,
  transitions: AtomicUsize,
  aborted: AtomicBool,
  lock: Mutex<()>,
  cvar: Condvar,
}

impl SyncFlags {
  pub fn new(count: usize) -> Self {
    SyncFlags {
      flags: (0..count).map(|_| AtomicBool::new(false)).collect(),
      transitions: AtomicUsize::new(0),
      aborted: AtomicBool::new(false),
      lock: Mutex::new(()),
      cvar: Condvar::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.flags.len()
  }

  /// Marks every CTU pending.
  pub fn reset(&mut self) {
    for flag in self.flags.iter_mut() {
      *flag.get_mut() = false;
    }
    *self.transitions.get_mut() = 0;
    *self.aborted.get_mut() = false;
  }

  pub fn is_done(&self, addr: usize) -> bool {
    self.flags[addr].load(Ordering::Acquire)
  }

  /// Number of pending to done transitions since the last reset.
  pub fn done_count(&self) -> usize {
    self.transitions.load(Ordering::Acquire)
  }

  pub fn set_done(&self, addr: usize) {
    let was_done = self.flags[addr].swap(true, Ordering::AcqRel);
    debug_assert!(!was_done, "CTU {addr} completed twice");
    self.transitions.fetch_add(1, Ordering::AcqRel);
    self.notify();
  }

  /// Wakes every waiter and makes current and future waits fail.
  pub fn abort(&self) {
    self.aborted.store(true, Ordering::Release);
    self.notify();
  }

  /// Blocks until `addr` is done.
  ///
  /// # Errors
  ///
  /// Returns `Aborted` if another worker gave up on the picture.
  pub fn wait(&self, addr: usize) -> Result<(), CollaboratorError> {
    let flag = &self.flags[addr];
    let backoff = Backoff::new();
    while !backoff.is_completed() {
      if flag.load(Ordering::Acquire) {
        return Ok(());
      }
      if self.aborted.load(Ordering::Acquire) {
        return Err(CollaboratorError::Aborted);
      }
      backoff.snooze();
    }

    let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
      if flag.load(Ordering::Acquire) {
        return Ok(());
      }
      if self.aborted.load(Ordering::Acquire) {
        return Err(CollaboratorError::Aborted);
      }
      guard = self.cvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
    }
  }

  fn notify(&self) {
    let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
    self.cvar.notify_all();
  }
}

/// Frozen decisions of the current picture, indexed by CTU address.
///
/// Each cell is written once, by the worker owning that CTU.
pub struct DecisionMap {
  cells: Box<[OnceLock<CtuDecision>]>,
  width_ctus: usize,
}

impl DecisionMap {
  /// # Errors
  ///
  /// Returns `OutOfMemory` if the map cannot be allocated.
  pub(crate) fn new(
    width_ctus: usize, height_ctus: usize,
  ) -> Result<Self, EncoderStatus> {
    let count = width_ctus * height_ctus;
    let mut cells = Vec::new();
    cells
      .try_reserve_exact(count)
      .map_err(|_| EncoderStatus::OutOfMemory)?;
    cells.resize_with(count, OnceLock::new);
    Ok(DecisionMap { cells: cells.into_boxed_slice(), width_ctus })
  }

  pub fn width_ctus(&self) -> usize {
    self.width_ctus
  }

  pub fn height_ctus(&self) -> usize {
    self.cells.len() / self.width_ctus
  }

  pub fn get(&self, addr: usize) -> Option<&CtuDecision> {
    self.cells.get(addr)?.get()
  }

  pub fn at(&self, x: usize, y: usize) -> Option<&CtuDecision> {
    if x >= self.width_ctus {
      return None;
    }
    self.get(y * self.width_ctus + x)
  }

  /// Frozen decisions in raster order.
  pub fn iter(&self) -> impl Iterator<Item = &CtuDecision> {
    self.cells.iter().filter_map(OnceLock::get)
  }

  pub(crate) fn clear(&mut self) {
    for cell in self.cells.iter_mut() {
      cell.take();
    }
  }

  pub(crate) fn freeze(&self, decision: CtuDecision) {
    let addr = decision.addr;
    let fresh = self.cells[addr].set(decision).is_ok();
    debug_assert!(fresh, "CTU {addr} decided twice");
  }
}

/// What the mode decision sees of the CTU it is deciding.
pub struct CtuContext<'a, T: Pixel> {
  pub frame: &'a Frame<T>,
  pub picture: &'a PictureParams,
  pub tile: &'a Tile,
  /// Raster address and picture coordinates, in CTUs.
  pub addr: usize,
  pub x: usize,
  pub y: usize,
  pub ctu_size: usize,
  /// Picture dimensions in luma samples.
  pub width: usize,
  pub height: usize,
  decisions: &'a DecisionMap,
}

impl<'a, T: Pixel> CtuContext<'a, T> {
  /// Luma area of the CTU; may extend past the picture edge.
  pub fn rect(&self) -> BlockRect {
    BlockRect {
      x: self.x * self.ctu_size,
      y: self.y * self.ctu_size,
      w: self.ctu_size,
      h: self.ctu_size,
    }
  }

  /// Decision of a causal neighbour in the same tile: left, top-left,
  /// top or top-right. These are always complete when the CTU is coded.
  pub fn neighbor(&self, dx: isize, dy: isize) -> Option<&'a CtuDecision> {
    let causal = matches!((dx, dy), (-1, 0) | (-1..=1, -1));
    if !causal {
      return None;
    }
    let x = self.x.checked_add_signed(dx)?;
    let y = self.y.checked_add_signed(dy)?;
    if !self.tile.contains(x, y) {
      return None;
    }
    self.decisions.at(x, y)
  }
}

/// How a picture's CTUs are spread over the workers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
  Wavefront,
  TileParallel,
}

/// Inputs shared by every worker during a decision pass.
pub(crate) struct PassInput<'a, T: Pixel> {
  pub frame: &'a Frame<T>,
  pub picture: &'a PictureParams,
  pub mode_decision: &'a dyn ModeDecision<T>,
  pub entropy: &'a dyn EntropyCoder,
}

/// Entropy coded payload of one tile.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct TileStream {
  pub bytes: Vec<u8>,
  pub bins: u64,
  /// Size in bytes of every substream, in coding order. A tile coded
  /// with entropy sync has one substream per CTU row.
  pub substreams: Vec<usize>,
}

impl TileStream {
  fn single(bytes: Vec<u8>, bins: u64) -> Self {
    let substreams = vec![bytes.len()];
    TileStream { bytes, bins, substreams }
  }

  fn append(&mut self, other: TileStream) {
    self.bytes.extend_from_slice(&other.bytes);
    self.bins += other.bins;
    self.substreams.extend_from_slice(&other.substreams);
  }
}

pub(crate) struct CtuEngine {
  workers: Vec<WorkerState>,
  pub(crate) sync: SyncFlags,
  pub(crate) decisions: DecisionMap,
  ctu_size: usize,
  width: usize,
  height: usize,
}

impl CtuEngine {
  /// # Errors
  ///
  /// Returns `OutOfMemory` if the per-CTU maps cannot be allocated.
  pub fn new(
    config: &EncoderConfig, worker_count: usize,
  ) -> Result<Self, EncoderStatus> {
    let (w, h) = (config.width_ctus(), config.height_ctus());
    let worker_count = worker_count.max(1);
    Ok(CtuEngine {
      workers: (0..worker_count).map(WorkerState::new).collect(),
      sync: SyncFlags::new(w * h),
      decisions: DecisionMap::new(w, h)?,
      ctu_size: config.ctu_size,
      width: config.width,
      height: config.height,
    })
  }

  pub fn worker_count(&self) -> usize {
    self.workers.len()
  }

  pub fn strategy(&self, tile_count: usize) -> Strategy {
    if tile_count == 1 && self.workers.len() > 1 {
      Strategy::Wavefront
    } else {
      Strategy::TileParallel
    }
  }

  /// Clears the state left by the previous picture.
  pub fn begin_picture(&mut self) {
    self.sync.reset();
    self.decisions.clear();
  }

  /// Decides every CTU of the tiles in `slice` and codes them into
  /// provisional streams, one per tile of the slice.
  ///
  /// # Errors
  ///
  /// Returns the first collaborator failure; the picture is abandoned.
  pub fn decision_pass<T: Pixel>(
    &mut self, input: &PassInput<'_, T>, tiles: &[Tile], slice: &[usize],
  ) -> Result<Vec<TileStream>, CollaboratorError> {
    match self.strategy(tiles.len()) {
      Strategy::Wavefront => {
        let stream = self.wavefront(input, &tiles[slice[0]])?;
        Ok(vec![stream])
      }
      Strategy::TileParallel => self.tile_parallel(input, tiles, slice),
    }
  }

  fn wavefront<T: Pixel>(
    &mut self, input: &PassInput<'_, T>, tile: &Tile,
  ) -> Result<TileStream, CollaboratorError> {
    let n = self.workers.len().min(tile.height_ctus);
    let rows = RowSlots::new(tile.height_ctus);
    let shared = Shared {
      ctu_size: self.ctu_size,
      width: self.width,
      height: self.height,
      decisions: &self.decisions,
    };
    let sync = &self.sync;

    run_workers(&mut self.workers[..n], |worker| {
      let res = wavefront_rows(input, &shared, tile, worker, n, sync, &rows);
      if res.is_err() {
        sync.abort();
      }
      res
    })?;

    debug_assert_eq!(tile.remaining(), 0);
    let mut stream = TileStream::default();
    for row in rows.streams {
      let row = row.into_inner().ok_or(CollaboratorError::Aborted)?;
      stream.append(row);
    }
    Ok(stream)
  }

  fn tile_parallel<T: Pixel>(
    &mut self, input: &PassInput<'_, T>, tiles: &[Tile], slice: &[usize],
  ) -> Result<Vec<TileStream>, CollaboratorError> {
    let n = self.workers.len().min(slice.len());
    let streams: Vec<OnceLock<TileStream>> =
      slice.iter().map(|_| OnceLock::new()).collect();
    let shared = Shared {
      ctu_size: self.ctu_size,
      width: self.width,
      height: self.height,
      decisions: &self.decisions,
    };
    let slice_type = input.picture.decision.slice_type;

    run_workers(&mut self.workers[..n], |worker| {
      let mine = slice.iter().enumerate().skip(worker.thread_idx).step_by(n);
      for (i, &t) in mine {
        let tile = &tiles[t];
        for y in 0..tile.height_ctus {
          for x in 0..tile.width_ctus {
            let decision = decide_ctu(input, &shared, tile, worker, x, y)?;
            shared.decisions.freeze(decision);
            tile.ctu_done();
          }
        }
        let stream = serialize_tile(
          input.entropy,
          tile,
          slice_type,
          shared.decisions,
          false,
        )?;
        let _ = streams[i].set(stream);
      }
      Ok(())
    })?;

    streams
      .into_iter()
      .map(|s| s.into_inner().ok_or(CollaboratorError::Aborted))
      .collect()
  }
}

/// Engine state read by every worker.
struct Shared<'a> {
  ctu_size: usize,
  width: usize,
  height: usize,
  decisions: &'a DecisionMap,
}

/// Per-row results of a wavefront pass.
struct RowSlots {
  /// Entropy state after the second CTU of each row.
  contexts: Vec<OnceLock<Box<dyn EntropyCoder>>>,
  streams: Vec<OnceLock<TileStream>>,
}

impl RowSlots {
  fn new(rows: usize) -> Self {
    RowSlots {
      contexts: (0..rows).map(|_| OnceLock::new()).collect(),
      streams: (0..rows).map(|_| OnceLock::new()).collect(),
    }
  }
}

/// Runs `job` for every worker: worker 0 on the calling thread, the
/// others on the current rayon pool, and joins them all.
fn run_workers<F>(
  workers: &mut [WorkerState], job: F,
) -> Result<(), CollaboratorError>
where
  F: Fn(&mut WorkerState) -> Result<(), CollaboratorError> + Sync,
{
  let mut results: Vec<Result<(), CollaboratorError>> =
    workers.iter().map(|_| Ok(())).collect();

  if let (Some((first, rest)), Some((first_res, rest_res))) =
    (workers.split_first_mut(), results.split_first_mut())
  {
    let job = &job;
    rayon::scope(|s| {
      for (worker, res) in rest.iter_mut().zip(rest_res.iter_mut()) {
        s.spawn(move |_| *res = job(worker));
      }
      *first_res = job(first);
    });
  }

  // report the failure that caused any aborts, not the aborts
  let mut aborted = false;
  for res in results {
    match res {
      Ok(()) => {}
      Err(CollaboratorError::Aborted) => aborted = true,
      Err(e) => return Err(e),
    }
  }
  if aborted {
    Err(CollaboratorError::Aborted)
  } else {
    Ok(())
  }
}

fn decide_ctu<T: Pixel>(
  input: &PassInput<'_, T>, shared: &Shared<'_>, tile: &Tile,
  worker: &mut WorkerState, x: usize, y: usize,
) -> Result<CtuDecision, CollaboratorError> {
  let (ctu_x, ctu_y) = (tile.x_ctus + x, tile.y_ctus + y);
  worker.tile_idx = tile.index;
  worker.ctu_x = ctu_x;
  worker.ctu_y = ctu_y;

  let ctx = CtuContext {
    frame: input.frame,
    picture: input.picture,
    tile,
    addr: tile.ctu_addr(x, y),
    x: ctu_x,
    y: ctu_y,
    ctu_size: shared.ctu_size,
    width: shared.width,
    height: shared.height,
    decisions: shared.decisions,
  };

  let md = input.mode_decision;
  md.init_ctu(&ctx, worker)?;
  let tree = md.analyze_ctu(&ctx, worker)?;
  let mut decision = CtuDecision { addr: ctx.addr, qp: tile.qp, tree };
  md.finalize_ctu(&ctx, worker, &mut decision)?;
  Ok(decision)
}

/// Column after which a row hands its entropy state to the row below.
const fn sync_col(tile: &Tile) -> usize {
  if tile.width_ctus > 1 {
    1
  } else {
    0
  }
}

/// Coder for the first CTU of a substream.
fn substream_coder(
  proto: &dyn EntropyCoder, tile: &Tile, slice_type: SliceType,
  above: Option<&dyn EntropyCoder>,
) -> Box<dyn EntropyCoder> {
  match above {
    Some(above) => above.snapshot(),
    None => {
      let mut coder = proto.snapshot();
      coder.reset_context(tile.qp_prev_for_entropy, slice_type);
      coder
    }
  }
}

fn end_substream(
  coder: &mut dyn EntropyCoder, cursor: &mut BitCursor,
) -> Result<(), CollaboratorError> {
  coder.end_of_tile(cursor)?;
  coder.flush(cursor)
}

/// Codes the frozen decisions of `tile` in raster order.
///
/// With `entropy_sync` every CTU row is a byte aligned substream
/// starting from the state the row above had after its second CTU, the
/// layout a wavefront pass produces.
///
/// # Errors
///
/// Fails with `MissingDecision` if a CTU of the tile was not decided.
pub(crate) fn serialize_tile(
  proto: &dyn EntropyCoder, tile: &Tile, slice_type: SliceType,
  decisions: &DecisionMap, entropy_sync: bool,
) -> Result<TileStream, CollaboratorError> {
  let decision = |x, y| {
    let addr = tile.ctu_addr(x, y);
    decisions.get(addr).ok_or(CollaboratorError::MissingDecision(addr))
  };
  let mut cursor = BitCursor::new();

  if !entropy_sync {
    let mut coder = substream_coder(proto, tile, slice_type, None);
    for y in 0..tile.height_ctus {
      for x in 0..tile.width_ctus {
        coder.encode_ctu(decision(x, y)?, &mut cursor)?;
      }
    }
    end_substream(coder.as_mut(), &mut cursor)?;
    let bins = coder.bin_count();
    return Ok(TileStream::single(cursor.into_bytes()?, bins));
  }

  let mut bins = 0;
  let mut substreams = Vec::with_capacity(tile.height_ctus);
  let mut row_start = 0;
  let mut above: Option<Box<dyn EntropyCoder>> = None;
  for y in 0..tile.height_ctus {
    let mut coder =
      substream_coder(proto, tile, slice_type, above.as_deref());
    let start_bins = coder.bin_count();
    for x in 0..tile.width_ctus {
      coder.encode_ctu(decision(x, y)?, &mut cursor)?;
      if x == sync_col(tile) {
        above = Some(coder.snapshot());
      }
    }
    end_substream(coder.as_mut(), &mut cursor)?;
    bins += coder.bin_count() - start_bins;
    substreams.push(cursor.byte_len() - row_start);
    row_start = cursor.byte_len();
  }
  let bytes = cursor.into_bytes()?;
  debug_assert_eq!(substreams.iter().sum::<usize>(), bytes.len());
  Ok(TileStream { bytes, bins, substreams })
}

fn wavefront_rows<T: Pixel>(
  input: &PassInput<'_, T>, shared: &Shared<'_>, tile: &Tile,
  worker: &mut WorkerState, stride: usize, sync: &SyncFlags,
  rows: &RowSlots,
) -> Result<(), CollaboratorError> {
  let slice_type = input.picture.decision.slice_type;
  let w = tile.width_ctus;

  for y in (worker.thread_idx..tile.height_ctus).step_by(stride) {
    let mut cursor = BitCursor::new();
    let mut coder: Option<Box<dyn EntropyCoder>> = None;
    let mut start_bins = 0;

    for x in 0..w {
      if y > 0 {
        sync.wait(tile.ctu_addr((x + 1).min(w - 1), y - 1))?;
      }
      let coder = coder.get_or_insert_with(|| {
        let above = y.checked_sub(1).and_then(|up| rows.contexts[up].get());
        substream_coder(input.entropy, tile, slice_type, above.map(|c| &**c))
      });
      if x == 0 {
        start_bins = coder.bin_count();
      }

      let decision = decide_ctu(input, shared, tile, worker, x, y)?;
      let addr = decision.addr;
      coder.encode_ctu(&decision, &mut cursor)?;
      if x == sync_col(tile) {
        let saved = worker.saved_context.insert(coder.snapshot());
        let _ = rows.contexts[y].set(saved.snapshot());
      }
      shared.decisions.freeze(decision);
      sync.set_done(addr);
      tile.ctu_done();
    }

    if let Some(mut coder) = coder {
      end_substream(coder.as_mut(), &mut cursor)?;
      let bins = coder.bin_count() - start_bins;
      let bytes = cursor.into_bytes()?;
      let _ = rows.streams[y].set(TileStream::single(bytes, bins));
    }
  }
  Ok(())
}
