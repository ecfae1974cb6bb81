// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![deny(bare_trait_objects)]

#[macro_use]
extern crate log;

mod common;
mod error;

use crate::common::*;
use crate::error::*;
use vencore::prelude::*;

use std::fs::File;
use std::io::{self, Write};
use std::process::exit;
use std::time::Instant;

fn main() {
  init_logger();

  run().unwrap_or_else(|e| {
    error::print_error(&e);
    exit(1);
  });
}

fn init_logger() {
  use std::str::FromStr;
  fn level_colored(l: log::Level) -> console::StyledObject<&'static str> {
    use console::style;
    use log::Level;
    match l {
      Level::Trace => style("??").dim(),
      Level::Debug => style("? ").dim(),
      Level::Info => style("> ").green(),
      Level::Warn => style("! ").yellow(),
      Level::Error => style("!!").red(),
    }
  }

  let level = std::env::var("VENCORE_LOG")
    .ok()
    .and_then(|l| log::LevelFilter::from_str(&l).ok())
    .unwrap_or(log::LevelFilter::Info);

  let applied = fern::Dispatch::new()
    .format(move |out, message, record| {
      out.finish(format_args!(
        "{level} {message}",
        level = level_colored(record.level()),
        message = message,
      ));
    })
    .level(log::LevelFilter::Warn)
    .level_for("vencore", level)
    .chain(std::io::stderr())
    .apply();
  if applied.is_err() {
    eprintln!("a logger was already installed");
  }
}

fn run() -> Result<(), CliError> {
  let cli = parse_cli()?;
  let cfg = cli.config();
  cfg.validate().map_err(|e| e.context("Invalid configuration"))?;
  info!("Using {}", cfg.encoder_config());

  let mut output: Box<dyn Write> = match &cli.output {
    Some(path) => Box::new(io::BufWriter::new(
      File::create(path).map_err(|e| e.context("Cannot create output"))?,
    )),
    None => Box::new(io::sink()),
  };
  let mut source = Source::open(&cli)?;
  let mut ctx: Context<u8> =
    cfg.new_context().map_err(|e| e.context("Cannot create encoder"))?;

  let start = Instant::now();
  let mut summary = Summary::default();
  let mut sent = 0;
  loop {
    match ctx.receive_packet() {
      Ok(packet) => {
        debug!("{packet}");
        output
          .write_all(&packet.data)
          .map_err(|e| e.context("Cannot write output"))?;
        summary.add(&packet);
      }
      Err(EncoderStatus::NeedMoreInput) => {
        let mut frame = ctx.new_frame();
        if sent < cli.limit && source.read_frame(&mut frame, sent)? {
          ctx
            .send_frame(frame)
            .map_err(|e| e.context("Cannot send picture"))?;
          sent += 1;
        } else {
          ctx.flush();
        }
      }
      Err(EncoderStatus::NoMoreFrames) => break,
      Err(e) => return Err(e.context("Encoding failed")),
    }
  }
  output.flush().map_err(|e| e.context("Cannot write output"))?;

  let elapsed = start.elapsed().as_secs_f64();
  let total: usize = summary.pictures.iter().sum();
  info!(
    "Encoded {total} pictures in {elapsed:.2}s ({:.1} fps)",
    total as f64 / elapsed.max(1e-6)
  );
  summary.print();
  Ok(())
}
