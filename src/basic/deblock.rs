// Copyright (c) 2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::encoder::{CollaboratorError, DecisionMap, DeblockFilter};
use crate::partition::*;
use crate::tiling::Tile;

/// Length of an edge segment, in luma samples.
const EDGE_STEP: usize = 8;

/// Deblocking driven by the boundary strength of coding unit edges.
///
/// Reconstruction is owned by the caller, so the filter only decides
/// which edge segments would be smoothed and reports how many.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryStrengthDeblock;

/// 2 next to an intra block, 1 across coded residual or a motion
/// discontinuity, 0 otherwise.
pub fn boundary_strength(p: &CodingUnit, q: &CodingUnit) -> u8 {
  if p.mode.is_intra() || q.mode.is_intra() {
    2
  } else if p.cbf || q.cbf || motion(p) != motion(q) {
    1
  } else {
    0
  }
}

fn motion(cu: &CodingUnit) -> Option<(u8, u8, MotionVector)> {
  match cu.mode {
    PredictionMode::Intra { .. } => None,
    PredictionMode::Inter { list, ref_idx, mv } => Some((list, ref_idx, mv)),
    PredictionMode::Skip { ref_idx } => {
      Some((0, ref_idx, MotionVector::default()))
    }
  }
}

fn contains(r: &BlockRect, x: usize, y: usize) -> bool {
  x >= r.x && x < r.x + r.w && y >= r.y && y < r.y + r.h
}

/// Coding unit covering luma sample (x, y), with its CTU coordinates.
fn cu_at(
  decisions: &DecisionMap, ctu_size: usize, x: usize, y: usize,
) -> Option<(&CodingUnit, usize, usize)> {
  let (cx, cy) = (x / ctu_size, y / ctu_size);
  let ctu = decisions.at(cx, cy)?;
  let cu = ctu.tree.leaves().find(|cu| contains(&cu.rect, x, y))?;
  Some((cu, cx, cy))
}

impl BoundaryStrengthDeblock {
  /// Counts the left and top edge segments of every coding unit in
  /// `tile` with a nonzero strength. With `inner` only segments whose
  /// other side lies in the tile are counted, otherwise only those
  /// crossing into another tile.
  fn count(
    &self, tile: &Tile, decisions: &DecisionMap, inner: bool,
  ) -> Result<u64, CollaboratorError> {
    let mut edges = 0;
    let mut neighbours = Vec::new();
    for addr in tile.ctu_addrs() {
      let ctu = decisions.get(addr).ok_or_else(|| {
        CollaboratorError::Deblock {
          tile: tile.index,
          reason: format!("CTU {addr} has no decision"),
        }
      })?;
      let ctu_size = ctu.tree.rect().w;

      for q in ctu.tree.leaves() {
        let r = q.rect;
        neighbours.clear();
        if r.x > 0 {
          let left = (r.y..r.y + r.h).step_by(EDGE_STEP);
          neighbours.extend(left.map(|y| (r.x - 1, y)));
        }
        if r.y > 0 {
          let top = (r.x..r.x + r.w).step_by(EDGE_STEP);
          neighbours.extend(top.map(|x| (x, r.y - 1)));
        }

        for &(x, y) in &neighbours {
          let Some((p, cx, cy)) = cu_at(decisions, ctu_size, x, y) else {
            continue;
          };
          if tile.contains(cx, cy) == inner && boundary_strength(p, q) > 0 {
            edges += 1;
          }
        }
      }
    }
    Ok(edges)
  }
}

impl DeblockFilter for BoundaryStrengthDeblock {
  fn deblock_tile(
    &self, tile: &Tile, decisions: &DecisionMap,
  ) -> Result<u64, CollaboratorError> {
    let edges = self.count(tile, decisions, true)?;
    trace!("tile {}: {} edges", tile.index, edges);
    Ok(edges)
  }

  fn deblock_tile_boundaries(
    &self, tiles: &[Tile], decisions: &DecisionMap,
  ) -> Result<u64, CollaboratorError> {
    tiles.iter().map(|tile| self.count(tile, decisions, false)).sum()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::api::TileConfig;
  use crate::tiling::TilingInfo;

  use pretty_assertions::assert_eq;

  const CTU: usize = 32;

  fn cu(rect: BlockRect, mode: PredictionMode, cbf: bool) -> CodingUnit {
    CodingUnit { rect, mode, qp_delta: 0, cbf }
  }

  /// 2x2 CTUs of one leaf each, with the given modes in raster order.
  fn picture(modes: [PredictionMode; 4]) -> DecisionMap {
    let map = DecisionMap::new(2, 2).unwrap();
    for (addr, mode) in modes.into_iter().enumerate() {
      let rect = BlockRect {
        x: addr % 2 * CTU,
        y: addr / 2 * CTU,
        w: CTU,
        h: CTU,
      };
      let tree = CodingTree::Leaf(cu(rect, mode, false));
      map.freeze(CtuDecision { addr, qp: 30, tree });
    }
    map
  }

  fn tiles(cols: usize, rows: usize) -> Vec<Tile> {
    TilingInfo::new(&TileConfig::uniform(cols, rows), 2, 2, 5)
      .unwrap()
      .tiles()
  }

  #[test]
  fn strength_by_mode() {
    let r = BlockRect::default();
    let intra = cu(r, PredictionMode::Intra { dir: 0 }, false);
    let skip = cu(r, PredictionMode::Skip { ref_idx: 0 }, false);
    let zero = PredictionMode::Inter {
      list: 0,
      ref_idx: 0,
      mv: MotionVector::default(),
    };
    let moved = PredictionMode::Inter {
      list: 0,
      ref_idx: 0,
      mv: MotionVector { row: 4, col: 0 },
    };

    assert_eq!(boundary_strength(&intra, &skip), 2);
    assert_eq!(boundary_strength(&skip, &skip), 0);
    assert_eq!(boundary_strength(&skip, &cu(r, zero, false)), 0);
    assert_eq!(boundary_strength(&skip, &cu(r, zero, true)), 1);
    assert_eq!(boundary_strength(&skip, &cu(r, moved, false)), 1);
  }

  #[test]
  fn intra_picture_edges() {
    let intra = PredictionMode::Intra { dir: 0 };
    let map = picture([intra; 4]);
    let filter = BoundaryStrengthDeblock;

    // One CTU column edge and one row edge, 4 segments each per CTU.
    let whole = &tiles(1, 1)[0];
    assert_eq!(filter.deblock_tile(whole, &map).unwrap(), 4 * 4);

    let split = tiles(2, 1);
    let inside: u64 = split
      .iter()
      .map(|t| filter.deblock_tile(t, &map).unwrap())
      .sum();
    assert_eq!(inside, 2 * 4);
    assert_eq!(filter.deblock_tile_boundaries(&split, &map).unwrap(), 2 * 4);
  }

  #[test]
  fn skipped_neighbours_are_not_filtered() {
    let skip = PredictionMode::Skip { ref_idx: 0 };
    let intra = PredictionMode::Intra { dir: 1 };
    let map = picture([skip, skip, skip, intra]);
    let filter = BoundaryStrengthDeblock;

    // Only the edges of the bottom right CTU remain.
    let whole = &tiles(1, 1)[0];
    assert_eq!(filter.deblock_tile(whole, &map).unwrap(), 2 * 4);
  }

  #[test]
  fn missing_decision_fails() {
    let map = DecisionMap::new(2, 2).unwrap();
    let filter = BoundaryStrengthDeblock;
    assert!(matches!(
      filter.deblock_tile(&tiles(1, 1)[0], &map),
      Err(CollaboratorError::Deblock { tile: 0, .. })
    ));
  }
}
