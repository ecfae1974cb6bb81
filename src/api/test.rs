// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::basic;
use crate::encoder::engine::test::random_frame;
use crate::encoder::nal::NalUnitIter;
use crate::header::{NalUnitHeader, NalUnitType};
use crate::prelude::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use interpolate_name::interpolate_test;
use pretty_assertions::assert_eq;

fn setup_config(gop_size: usize, i_period: usize) -> EncoderConfig {
  EncoderConfig {
    width: 64,
    height: 64,
    ctu_size: 32,
    gop_size,
    i_period,
    inter_slice_type: if gop_size == 1 { SliceType::P } else { SliceType::B },
    ..Default::default()
  }
}

fn setup_encoder(enc: EncoderConfig, threads: usize) -> Context<u8> {
  Config::new()
    .with_encoder_config(enc)
    .with_threads(threads)
    .new_context()
    .unwrap()
}

fn send_test_frame(ctx: &mut Context<u8>, seed: u64) {
  let frame = random_frame(ctx.config(), seed as u8);
  ctx.send_frame(frame).unwrap();
}

/// Sends `limit` frames, receiving whatever is ready after each one,
/// then flushes and drains.
fn encode(ctx: &mut Context<u8>, limit: u64) -> Vec<Packet<u8>> {
  let mut packets = Vec::new();
  let mut drain = |ctx: &mut Context<u8>| loop {
    match ctx.receive_packet() {
      Ok(pkt) => packets.push(pkt),
      Err(EncoderStatus::NeedMoreInput | EncoderStatus::NoMoreFrames) => {
        break
      }
      Err(e) => panic!("unexpected status {e:?}"),
    }
  };

  for i in 0..limit {
    send_test_frame(ctx, i);
    drain(ctx);
  }
  ctx.flush();
  drain(ctx);
  packets
}

fn pocs(packets: &[Packet<u8>]) -> Vec<u64> {
  packets.iter().map(|p| p.poc).collect()
}

#[test]
fn low_delay_intra_period() {
  let mut ctx = setup_encoder(setup_config(1, 4), 1);
  let packets = encode(&mut ctx, 6);

  assert_eq!(pocs(&packets), vec![0, 1, 2, 3, 4, 5]);
  let types: Vec<_> = packets.iter().map(|p| p.slice_type).collect();
  use SliceType::*;
  assert_eq!(types, vec![I, P, P, P, I, P]);
}

#[test]
fn hierarchical_coding_order() {
  let mut ctx = setup_encoder(setup_config(8, 0), 2);
  let packets = encode(&mut ctx, 20);

  assert_eq!(
    pocs(&packets),
    vec![0, 8, 4, 2, 6, 1, 3, 5, 7, 16, 12, 10, 14, 9, 11, 13, 15, 18, 17, 19]
  );

  let first_gop: Vec<_> =
    packets[..9].iter().map(|p| (p.depth, p.ref_flag)).collect();
  assert_eq!(
    first_gop,
    vec![
      (0, true),
      (1, true),
      (2, true),
      (3, true),
      (3, true),
      (4, false),
      (4, false),
      (4, false),
      (4, false),
    ]
  );
  assert!(packets[1..].iter().all(|p| p.slice_type == SliceType::B));
}

#[test]
fn intra_period_in_random_access() {
  let mut ctx = setup_encoder(setup_config(4, 8), 1);
  let packets = encode(&mut ctx, 10);

  assert_eq!(pocs(&packets), vec![0, 4, 2, 1, 3, 8, 6, 5, 7, 9]);
  let intra: Vec<_> = packets
    .iter()
    .filter(|p| p.slice_type == SliceType::I)
    .map(|p| p.poc)
    .collect();
  assert_eq!(intra, vec![0, 8]);
}

#[interpolate_test(one, 1)]
#[interpolate_test(partial_gop, 5)]
#[interpolate_test(one_gop, 9)]
#[interpolate_test(two_gops_and_a_bit, 19)]
fn flush_drains_every_picture(limit: u64) {
  let mut ctx = setup_encoder(setup_config(8, 0), 2);
  let packets = encode(&mut ctx, limit);

  let mut seen = pocs(&packets);
  seen.sort_unstable();
  assert_eq!(seen, (0..limit).collect::<Vec<_>>());

  assert_eq!(ctx.receive_packet(), Err(EncoderStatus::NoMoreFrames));
  assert_eq!(ctx.receive_packet(), Err(EncoderStatus::NoMoreFrames));
  let frame = ctx.new_frame();
  assert_eq!(ctx.send_frame(frame), Err(EncoderStatus::EnoughData));
}

#[test]
fn need_more_input_until_the_gop_fills() {
  let mut ctx = setup_encoder(setup_config(4, 0), 1);

  for i in 0..2 {
    send_test_frame(&mut ctx, i);
    assert_eq!(ctx.receive_packet(), Err(EncoderStatus::NeedMoreInput));
  }
  send_test_frame(&mut ctx, 2);
  let pkt = ctx.receive_packet().unwrap();
  assert_eq!((pkt.poc, pkt.slice_type), (0, SliceType::I));
  // Picture 4 closes the first GOP.
  assert_eq!(ctx.receive_packet(), Err(EncoderStatus::NeedMoreInput));
}

#[test]
fn picture_buffer_capacity() {
  let mut ctx = setup_encoder(setup_config(4, 0), 1);

  for i in 0..7 {
    send_test_frame(&mut ctx, i);
  }
  let frame = random_frame(ctx.config(), 7);
  assert_eq!(
    ctx.send_frame(frame.clone()),
    Err(EncoderStatus::CapacityExceeded)
  );

  assert_eq!(ctx.receive_packet().map(|p| p.poc), Ok(0));
  ctx.send_frame(frame).unwrap();
}

#[test]
fn wrong_dimensions_are_rejected() {
  let mut ctx = setup_encoder(setup_config(1, 0), 1);
  let frame = Frame::<u8>::new(32, 64, ChromaSampling::Cs420);
  assert_eq!(ctx.send_frame(frame), Err(EncoderStatus::InvalidArgument));
  send_test_frame(&mut ctx, 0);
  assert_eq!(ctx.receive_packet().map(|p| p.poc), Ok(0));
}

#[test]
fn unaligned_pictures_are_accepted() {
  let enc = EncoderConfig { width: 60, height: 44, ..setup_config(2, 0) };
  let mut ctx = setup_encoder(enc, 2);
  assert_eq!(ctx.new_frame().planes[0].cfg.width, 64);
  let packets = encode(&mut ctx, 4);
  assert_eq!(pocs(&packets).len(), 4);
}

#[test]
fn runtime_settings() {
  let mut enc = setup_config(8, 0);
  // Keeps the QP free of the complexity bias.
  enc.lookahead = false;
  let mut ctx = setup_encoder(enc, 1);

  assert_eq!(ctx.configure("speed", 1), Err(EncoderStatus::Unsupported));
  assert_eq!(ctx.configure("qp", 52), Err(EncoderStatus::InvalidArgument));
  assert_eq!(ctx.configure("qp", -1), Err(EncoderStatus::InvalidArgument));
  assert_eq!(
    ctx.configure("i_period", 12),
    Err(EncoderStatus::InvalidArgument)
  );
  assert_eq!(
    ctx.configure("deblock", 2),
    Err(EncoderStatus::InvalidArgument)
  );

  ctx.configure("qp", 20).unwrap();
  ctx.configure("i_period", 16).unwrap();
  ctx.configure("deblock", 0).unwrap();
  ctx.configure("cross_tile_deblock", 0).unwrap();
  let config = ctx.config();
  assert_eq!(config.qp, 20);
  assert_eq!(config.i_period, 16);
  assert!(!config.deblock);
  assert!(!config.cross_tile_deblock);

  ctx.configure("force_output", 0).unwrap();
  send_test_frame(&mut ctx, 0);
  ctx.configure("force_output", 1).unwrap();
  let frame = ctx.new_frame();
  assert_eq!(ctx.send_frame(frame), Err(EncoderStatus::EnoughData));

  let pkt = ctx.receive_packet().unwrap();
  assert_eq!((pkt.poc, pkt.qp), (0, 20));
  assert_eq!(ctx.receive_packet(), Err(EncoderStatus::NoMoreFrames));
}

fn nal_types(data: &[u8]) -> Vec<NalUnitType> {
  NalUnitIter::new(data)
    .map(|nal| NalUnitHeader::parse(nal).unwrap().nal_type)
    .collect()
}

#[test]
fn parameter_sets_lead_the_stream() {
  let mut ctx = setup_encoder(setup_config(1, 0), 1);
  let sets = ctx.parameter_sets().unwrap();
  assert_eq!(nal_types(&sets), vec![NalUnitType::Sps, NalUnitType::Pps]);

  // a low-delay ring holds a single picture
  send_test_frame(&mut ctx, 0);
  let first = ctx.receive_packet().unwrap();
  send_test_frame(&mut ctx, 1);
  let second = ctx.receive_packet().unwrap();
  assert!(first.data.starts_with(&sets));
  assert_eq!(
    nal_types(&first.data),
    vec![NalUnitType::Sps, NalUnitType::Pps, NalUnitType::Idr]
  );
  assert_eq!(nal_types(&second.data), vec![NalUnitType::NonIdr]);

  // Unchanged settings keep the stream as is.
  ctx.configure("deblock", 1).unwrap();
  send_test_frame(&mut ctx, 2);
  let third = ctx.receive_packet().unwrap();
  assert_eq!(nal_types(&third.data), vec![NalUnitType::NonIdr]);

  ctx.configure("deblock", 0).unwrap();
  let updated = ctx.parameter_sets().unwrap();
  assert_ne!(updated, sets);
  send_test_frame(&mut ctx, 3);
  let fourth = ctx.receive_packet().unwrap();
  assert!(fourth.data.starts_with(&updated));
}

#[test]
fn every_ctu_is_counted() {
  let mut enc = setup_config(1, 0);
  enc.tiles = TileConfig::uniform(2, 1);
  enc.slices = SliceConfig::Contiguous { num_slices: 2 };
  let mut ctx = setup_encoder(enc, 2);
  let packets = encode(&mut ctx, 3);

  for pkt in &packets {
    assert_eq!(pkt.enc_stats.ctus, 4);
    assert_eq!(pkt.enc_stats.slices, 2);
    assert_eq!(pkt.enc_stats.tiles, 2);
  }
}

#[interpolate_test(wavefront, 1, 1, 2, 4)]
#[interpolate_test(tiles, 2, 2, 1, 4)]
fn output_does_not_depend_on_threads(
  cols: usize, rows: usize, threads_a: usize, threads_b: usize,
) {
  let mut enc = setup_config(4, 0);
  enc.width = 160;
  enc.height = 128;
  enc.tiles = TileConfig::uniform(cols, rows);

  let mut a = setup_encoder(enc.clone(), threads_a);
  let mut b = setup_encoder(enc, threads_b);
  assert_eq!(encode(&mut a, 6), encode(&mut b, 6));
}

/// Fails the analysis of one CTU while `armed` is set.
struct FailOnce {
  inner: basic::VarianceModeDecision,
  armed: AtomicBool,
}

impl ModeDecision<u8> for FailOnce {
  fn analyze_ctu(
    &self, ctx: &CtuContext<'_, u8>, worker: &mut WorkerState,
  ) -> Result<CodingTree, CollaboratorError> {
    if ctx.addr == 1 && self.armed.swap(false, Ordering::SeqCst) {
      let reason = "injected".to_string();
      return Err(CollaboratorError::ModeDecision { addr: 1, reason });
    }
    self.inner.analyze_ctu(ctx, worker)
  }
}

#[test]
fn failed_picture_can_be_retried() {
  let enc = setup_config(1, 0);
  let mut collaborators = Collaborators::basic(&enc);
  collaborators.mode_decision = Arc::new(FailOnce {
    inner: basic::VarianceModeDecision::default(),
    armed: AtomicBool::new(true),
  });
  let cfg = Config::new().with_encoder_config(enc).with_threads(2);
  let mut ctx: Context<u8> = cfg.new_context_with(collaborators).unwrap();

  send_test_frame(&mut ctx, 0);
  assert_eq!(ctx.receive_packet(), Err(EncoderStatus::Unexpected));

  let pkt = ctx.receive_packet().unwrap();
  assert_eq!((pkt.poc, pkt.slice_type), (0, SliceType::I));
  assert!(nal_types(&pkt.data).starts_with(&[NalUnitType::Sps]));
}
