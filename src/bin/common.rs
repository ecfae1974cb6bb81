// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::error::*;
use clap::Parser;
use vencore::prelude::*;

use std::fs::File;
use std::io::{self, prelude::*};

/// Encodes raw or synthetic pictures with the reference collaborators.
#[derive(Parser, Debug)]
#[command(name = "vencore", version, about)]
pub struct CliOptions {
  /// Raw 8-bit 4:2:0 input; a moving test pattern is used when absent
  #[arg(short, long)]
  pub input: Option<String>,
  /// Output file receiving the concatenated NAL units
  #[arg(short, long)]
  pub output: Option<String>,
  /// Picture width in pixels
  #[arg(long, default_value_t = 352)]
  pub width: usize,
  /// Picture height in pixels
  #[arg(long, default_value_t = 288)]
  pub height: usize,
  /// Maximum number of pictures to encode
  #[arg(short, long, default_value_t = 32)]
  pub limit: usize,
  /// Pictures per GOP (1, 2, 4, 8 or 16)
  #[arg(short, long, default_value_t = 8)]
  pub gop_size: usize,
  /// Distance between intra pictures, 0 for the first only
  #[arg(long, default_value_t = 0)]
  pub i_period: usize,
  /// Base quantizer (0-51)
  #[arg(short, long, default_value_t = 32)]
  pub qp: u8,
  /// CTU size (32, 64 or 128)
  #[arg(long, default_value_t = 64)]
  pub ctu_size: usize,
  /// Tile columns
  #[arg(long, default_value_t = 1)]
  pub tile_cols: usize,
  /// Tile rows
  #[arg(long, default_value_t = 1)]
  pub tile_rows: usize,
  /// Slices per picture
  #[arg(long, default_value_t = 1)]
  pub slices: usize,
  /// Worker threads, 0 for one per core
  #[arg(short, long, default_value_t = 0)]
  pub threads: usize,
  /// Code every picture after the first as P in display order
  #[arg(long)]
  pub low_delay: bool,
  /// Skip the deblocking pass
  #[arg(long)]
  pub no_deblock: bool,
  /// Skip the push-time complexity analysis
  #[arg(long)]
  pub no_lookahead: bool,
  /// Seed of the synthetic pattern
  #[arg(long, default_value_t = 0)]
  pub seed: u8,
}

impl CliOptions {
  pub fn config(&self) -> Config {
    let base = if self.low_delay {
      EncoderConfig::low_delay()
    } else {
      EncoderConfig { gop_size: self.gop_size, ..Default::default() }
    };
    let enc = EncoderConfig {
      width: self.width,
      height: self.height,
      i_period: self.i_period,
      qp: self.qp,
      ctu_size: self.ctu_size,
      tiles: TileConfig::uniform(self.tile_cols, self.tile_rows),
      slices: SliceConfig::Contiguous { num_slices: self.slices },
      deblock: !self.no_deblock,
      lookahead: !self.no_lookahead,
      ..base
    };
    Config::new().with_encoder_config(enc).with_threads(self.threads)
  }
}

pub fn parse_cli() -> Result<CliOptions, CliError> {
  let cli = CliOptions::parse();
  if cli.limit == 0 {
    return Err(CliError::new("The picture limit must be above 0"));
  }
  Ok(cli)
}

/// Produces the pictures to encode.
pub enum Source {
  /// Planar samples of `width` x `height` luma pictures.
  Raw { input: Box<dyn Read>, width: usize, height: usize },
  Pattern { seed: u8 },
}

impl Source {
  pub fn open(cli: &CliOptions) -> Result<Source, CliError> {
    let input: Box<dyn Read> = match &cli.input {
      Some(path) if path == "-" => Box::new(io::stdin()),
      Some(path) => {
        let file = File::open(path)
          .map_err(|e| e.context("Cannot open input file"))?;
        Box::new(io::BufReader::new(file))
      }
      None => return Ok(Source::Pattern { seed: cli.seed }),
    };
    Ok(Source::Raw { input, width: cli.width, height: cli.height })
  }

  /// Fills `frame` with picture `index`. Returns false at the end of a
  /// raw input.
  pub fn read_frame(
    &mut self, frame: &mut Frame<u8>, index: usize,
  ) -> Result<bool, CliError> {
    match self {
      Source::Raw { input, width, height } => {
        for plane in frame.planes.iter_mut() {
          let (xdec, ydec) = (plane.cfg.xdec, plane.cfg.ydec);
          let w = (*width + xdec) >> xdec;
          let h = (*height + ydec) >> ydec;
          let mut buf = vec![0u8; w * h];
          match input.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
              return Ok(false)
            }
            Err(e) => return Err(e.context("Cannot read input")),
          }
          plane.copy_from_raw_u8(&buf, w, 1);
        }
        Ok(true)
      }
      Source::Pattern { seed } => {
        draw_pattern(frame, index, *seed);
        Ok(true)
      }
    }
  }
}

// A diagonal gradient with a bright square moving right by 4 pixels per
// picture.
fn draw_pattern(frame: &mut Frame<u8>, index: usize, seed: u8) {
  for (p, plane) in frame.planes.iter_mut().enumerate() {
    let (w, h) = (plane.cfg.width, plane.cfg.height);
    let scale = if p == 0 { 1 } else { 2 };
    let side = 64 / scale;
    let sx = (index * 4 / scale) % w.max(1);
    let sy = h / 4;
    let mut buf = vec![0u8; w * h];
    for (y, row) in buf.chunks_exact_mut(w).enumerate() {
      for (x, px) in row.iter_mut().enumerate() {
        let inside = x >= sx && x < sx + side && y >= sy && y < sy + side;
        *px = if inside && p == 0 {
          235
        } else {
          ((x + y) as u8).wrapping_add(seed) / 2 + 32
        };
      }
    }
    plane.copy_from_raw_u8(&buf, w, 1);
  }
}

#[derive(Debug, Default)]
pub struct Summary {
  pub pictures: [usize; 3],
  pub bytes: [usize; 3],
  pub qp_sum: [usize; 3],
  pub stats: EncoderStats,
}

impl Summary {
  pub fn add(&mut self, packet: &Packet<u8>) {
    let i = packet.slice_type.code() as usize;
    self.pictures[i] += 1;
    self.bytes[i] += packet.data.len();
    self.qp_sum[i] += packet.qp as usize;
    self.stats += &packet.enc_stats;
  }

  pub fn print(&self) {
    for (i, name) in ["B", "P", "I"].iter().enumerate() {
      let n = self.pictures[i];
      if n == 0 {
        continue;
      }
      info!(
        "{name}: {n} pictures, {} bytes, avg qp {:.1}",
        self.bytes[i],
        self.qp_sum[i] as f64 / n as f64
      );
    }
    let s = &self.stats;
    info!(
      "{} CTUs, {} CUs ({} intra, {} inter, {} skip), {} zero words",
      s.ctus,
      s.coding_units(),
      s.intra_cus,
      s.inter_cus,
      s.skip_cus,
      s.zero_words
    );
  }
}
