// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use thiserror::Error;

use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

use crate::api::{Context, ContextInner, EncoderStatus};
use crate::encoder::Collaborators;
use crate::gop::{SliceType, MAX_GOP_SIZE};
use crate::tiling::{SliceLayout, TilingInfo};
use crate::util::Pixel;

mod encoder;
pub use encoder::*;

/// Enumeration of possible invalid configuration errors.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum InvalidConfig {
  /// The width is invalid.
  #[error("invalid width {0} (expected >= 16, <= 65535)")]
  InvalidWidth(usize),
  /// The height is invalid.
  #[error("invalid height {0} (expected >= 16, <= 65535)")]
  InvalidHeight(usize),
  /// The bit depth is unsupported.
  #[error("invalid bit depth {0} (expected 8, 10 or 12)")]
  InvalidBitDepth(usize),
  /// The pixel type cannot hold samples of the configured bit depth.
  #[error("{pixel_bits}-bit pixels cannot hold {bit_depth}-bit samples")]
  PixelTooNarrow {
    /// The configured bit depth.
    bit_depth: usize,
    /// Size of the pixel type in bits.
    pixel_bits: usize,
  },
  /// The CTU size is invalid.
  #[error("invalid CTU size {0} (expected 32, 64 or 128)")]
  InvalidCtuSize(usize),
  /// The GOP size is invalid.
  #[error("invalid GOP size {0} (expected 1, 2, 4, 8 or 16)")]
  InvalidGopSize(usize),
  /// The intra period does not line up with the GOP.
  #[error("invalid intra period {i_period} (expected multiple of {gop_size})")]
  InvalidIntraPeriod {
    /// The actual value.
    i_period: usize,
    /// The configured GOP size.
    gop_size: usize,
  },
  /// The low-delay reference gap is invalid.
  #[error("invalid reference gap {0} (expected a power of 2, <= 16)")]
  InvalidRefGap(usize),
  /// The number of references is invalid.
  #[error("invalid reference count {actual} (expected >= 1, <= {max})")]
  InvalidMaxRefs {
    /// The actual value.
    actual: usize,
    /// The maximal supported value.
    max: usize,
  },
  /// The QP is invalid.
  #[error("invalid qp {0} (expected <= 51)")]
  InvalidQp(u8),
  /// Random access GOPs need inter slices.
  #[error("inter slice type cannot be I when the GOP size is above 1")]
  InvalidInterSliceType,
  /// Tile columns is invalid.
  #[error("invalid tile cols {actual} (expected >= 1, <= {max})")]
  InvalidTileCols {
    /// The actual value.
    actual: usize,
    /// The maximal supported value.
    max: usize,
  },
  /// Tile rows is invalid.
  #[error("invalid tile rows {actual} (expected >= 1, <= {max})")]
  InvalidTileRows {
    /// The actual value.
    actual: usize,
    /// The maximal supported value.
    max: usize,
  },
  /// An explicit tile size is zero.
  #[error("invalid tile sizes {sizes:?} (expected all > 0)")]
  TileSizes {
    /// The offending sizes, in CTUs.
    sizes: Vec<usize>,
  },
  /// Explicit tile sizes do not add up to the picture size.
  #[error("tile sizes add up to {sum} CTUs instead of {expected}")]
  TileGeometryMismatch {
    /// Sum of the sizes.
    sum: usize,
    /// Picture size in CTUs.
    expected: usize,
  },
  /// The number of slices is invalid.
  #[error("invalid slice count {actual} (expected >= 1, <= {max})")]
  InvalidSliceCount {
    /// The actual value.
    actual: usize,
    /// The number of tiles.
    max: usize,
  },
  /// A slice names a tile that does not exist.
  #[error("slice tile {tile} out of range (picture has {tile_count} tiles)")]
  SliceTileOutOfRange {
    /// The tile index.
    tile: usize,
    /// The number of tiles.
    tile_count: usize,
  },
  /// A tile is missing from the slices or appears twice.
  #[error("tile {tile} must belong to exactly one slice")]
  SliceTileCoverage {
    /// The tile index.
    tile: usize,
  },
}

/// Contains the encoder configuration.
#[derive(Clone, Debug, Default)]
pub struct Config {
  /// Settings which impact the produced bitstream.
  pub(crate) enc: EncoderConfig,
  /// The number of threads in the threadpool.
  pub(crate) threads: usize,
  /// Shared thread pool
  pub(crate) pool: Option<Arc<ThreadPool>>,
}

impl Config {
  /// Create a default configuration
  ///
  /// same as `Default::default()`
  pub fn new() -> Self {
    Config::default()
  }

  /// Set the encoder configuration
  ///
  /// `EncoderConfig` contains the settings impacting the
  /// codec features used in the produced bitstream.
  pub fn with_encoder_config(mut self, enc: EncoderConfig) -> Self {
    self.enc = enc;
    self
  }

  /// Set the number of workers in the threadpool
  ///
  /// The threadpool runs the CTU workers of every picture. With a single
  /// tile and more than one thread, CTU rows are coded as a wavefront.
  ///
  /// If it is left unset, the encoder will use the default global
  /// threadpool provided by Rayon instead.
  pub const fn with_threads(mut self, threads: usize) -> Self {
    self.threads = threads;
    self
  }

  /// Use the provided threadpool
  ///
  /// It takes priority over `with_threads()`
  pub fn with_thread_pool(mut self, pool: Arc<ThreadPool>) -> Self {
    self.pool = Some(pool);
    self
  }

  /// The settings impacting the produced bitstream.
  pub fn encoder_config(&self) -> &EncoderConfig {
    &self.enc
  }
}

impl Config {
  /// Create a new threadpool with this configuration if set,
  /// or return `None` if global threadpool should be used instead.
  pub(crate) fn new_thread_pool(
    &self,
  ) -> Result<Option<Arc<ThreadPool>>, EncoderStatus> {
    if let Some(ref p) = self.pool {
      Ok(Some(p.clone()))
    } else if self.threads != 0 {
      let pool = ThreadPoolBuilder::new()
        .num_threads(self.threads)
        .thread_name(|i| format!("vencore-worker-{i}"))
        .build()
        .map_err(|e| {
          error!("cannot start the thread pool: {e}");
          EncoderStatus::Unexpected
        })?;
      Ok(Some(Arc::new(pool)))
    } else {
      Ok(None)
    }
  }

  /// Number of CTU workers a picture is split over.
  fn worker_count(&self, pool: Option<&ThreadPool>) -> usize {
    let available = pool.map_or_else(
      rayon::current_num_threads,
      ThreadPool::current_num_threads,
    );
    if self.threads == 0 {
      available
    } else {
      self.threads.min(available)
    }
  }

  /// Creates a [`Context`] with this configuration and the collaborators
  /// from [`crate::basic`].
  ///
  /// # Errors
  ///
  /// Returns `InvalidArgument` if the config is invalid.
  ///
  /// # Examples
  ///
  /// ```
  /// use vencore::prelude::*;
  ///
  /// # fn main() -> Result<(), EncoderStatus> {
  /// let cfg = Config::default();
  /// let ctx: Context<u8> = cfg.new_context()?;
  /// # Ok(())
  /// # }
  /// ```
  pub fn new_context<T: Pixel>(&self) -> Result<Context<T>, EncoderStatus> {
    self.new_context_with(Collaborators::basic(&self.enc))
  }

  /// Creates a [`Context`] driving the given collaborators.
  ///
  /// # Errors
  ///
  /// Returns `InvalidArgument` if the config is invalid, `OutOfMemory`
  /// if the per-picture state cannot be allocated.
  pub fn new_context_with<T: Pixel>(
    &self, collaborators: Collaborators<T>,
  ) -> Result<Context<T>, EncoderStatus> {
    self.validate_for::<T>()?;

    let pool = self.new_thread_pool()?;
    let workers = self.worker_count(pool.as_deref());
    let inner = ContextInner::new(&self.enc, workers, collaborators)?;
    debug!("encoder configured: {} workers={}", self.enc, workers);

    Ok(Context { inner, pool, is_flushing: false })
  }

  fn validate_for<T: Pixel>(&self) -> Result<(), InvalidConfig> {
    let pixel_bits = 8 * std::mem::size_of::<T>();
    if pixel_bits < self.enc.bit_depth {
      return Err(InvalidConfig::PixelTooNarrow {
        bit_depth: self.enc.bit_depth,
        pixel_bits,
      });
    }
    self.validate()
  }

  /// Validates the configuration.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if any setting is out of range or the
  ///   tile and slice layout does not fit the picture.
  pub fn validate(&self) -> Result<(), InvalidConfig> {
    use InvalidConfig::*;

    let config = &self.enc;

    if config.width < 16 || config.width > MAX_DIMENSION {
      return Err(InvalidWidth(config.width));
    }
    if config.height < 16 || config.height > MAX_DIMENSION {
      return Err(InvalidHeight(config.height));
    }
    if ![8, 10, 12].contains(&config.bit_depth) {
      return Err(InvalidBitDepth(config.bit_depth));
    }
    if ![32, 64, 128].contains(&config.ctu_size) {
      return Err(InvalidCtuSize(config.ctu_size));
    }
    if !config.gop_size.is_power_of_two()
      || config.gop_size as u64 > MAX_GOP_SIZE
    {
      return Err(InvalidGopSize(config.gop_size));
    }
    if config.gop_size > 1 && config.i_period % config.gop_size != 0 {
      return Err(InvalidIntraPeriod {
        i_period: config.i_period,
        gop_size: config.gop_size,
      });
    }
    if !config.ref_pic_gap_length.is_power_of_two()
      || config.ref_pic_gap_length > 16
    {
      return Err(InvalidRefGap(config.ref_pic_gap_length));
    }
    if config.max_refs == 0 || config.max_refs > MAX_REFS {
      return Err(InvalidMaxRefs { actual: config.max_refs, max: MAX_REFS });
    }
    if config.qp > MAX_QP {
      return Err(InvalidQp(config.qp));
    }
    if config.gop_size > 1 && config.inter_slice_type == SliceType::I {
      return Err(InvalidInterSliceType);
    }

    let tiling = TilingInfo::from_config(config)?;
    SliceLayout::new(&config.slices, tiling.tile_count())?;

    Ok(())
  }

  /// Provide the tiling information for the current Config
  ///
  /// Useful for reporting and debugging.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if the configuration is invalid.
  pub fn tiling_info(&self) -> Result<TilingInfo, InvalidConfig> {
    self.validate()?;
    TilingInfo::from_config(&self.enc)
  }
}
