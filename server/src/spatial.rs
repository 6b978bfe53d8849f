//! Uniform grid used to find cars close enough to collide.
//!
//! The grid is rebuilt from scratch every step. Entries are referred to by their
//! index in the step's snapshot, so the room can resolve pairs without another
//! roster lookup.

use shared::SPATIAL_CELL_SIZE;
use std::collections::{BTreeMap, HashSet};

/// Cells checked from each base cell besides the cell itself. Together with the
/// mirrored offsets of the neighbours this covers the full 3x3 neighbourhood once.
const HALF_NEIGHBOURHOOD: [(i64, i64); 4] = [(0, 1), (1, -1), (1, 0), (1, 1)];

#[derive(Debug, Clone, Copy)]
struct Entry {
    index: usize,
    id: u16,
}

#[derive(Debug)]
pub struct SpatialGrid {
    cell_size: f64,
    cells: BTreeMap<(i64, i64), Vec<Entry>>,
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(SPATIAL_CELL_SIZE)
    }
}

impl SpatialGrid {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size,
            cells: BTreeMap::new(),
        }
    }

    pub fn cell_key(&self, x: f64, y: f64) -> (i64, i64) {
        (
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    /// Replaces the grid contents with `(id, x, y)` entries in snapshot order.
    pub fn rebuild<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (u16, f64, f64)>,
    {
        self.cells.clear();
        for (index, (id, x, y)) in entries.into_iter().enumerate() {
            let key = self.cell_key(x, y);
            self.cells.entry(key).or_default().push(Entry { index, id });
        }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Snapshot index pairs that share a cell or sit in adjacent cells.
    ///
    /// Each unordered pair appears once. Within a cell the earlier snapshot entry
    /// comes first; across cells the base cell's entry comes first.
    pub fn candidate_pairs(&self) -> Vec<(usize, usize)> {
        let mut seen = HashSet::new();
        let mut pairs = Vec::new();

        let mut push = |a: &Entry, b: &Entry| {
            if seen.insert(pair_key(a.id, b.id)) {
                pairs.push((a.index, b.index));
            }
        };

        for entries in self.cells.values() {
            for (i, a) in entries.iter().enumerate() {
                for b in &entries[i + 1..] {
                    push(a, b);
                }
            }
        }

        for (&(cx, cy), entries) in &self.cells {
            for (dx, dy) in HALF_NEIGHBOURHOOD {
                let Some(neighbours) = self.cells.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for a in entries {
                    for b in neighbours {
                        push(a, b);
                    }
                }
            }
        }

        pairs
    }
}

/// Order-independent key for a pair of participant ids.
pub fn pair_key(a: u16, b: u16) -> u32 {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    (u32::from(lo) << 16) | u32::from(hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut pairs: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
        for pair in pairs.iter_mut() {
            if pair.0 > pair.1 {
                *pair = (pair.1, pair.0);
            }
        }
        pairs.sort_unstable();
        pairs
    }

    #[test]
    fn test_cell_key_floors_negatives() {
        let grid = SpatialGrid::default();
        assert_eq!(grid.cell_key(0.0, 0.0), (0, 0));
        assert_eq!(grid.cell_key(99.9, 100.0), (0, 1));
        assert_eq!(grid.cell_key(-0.5, -100.0), (-1, -1));
        assert_eq!(grid.cell_key(-100.5, 250.0), (-2, 2));
    }

    #[test]
    fn test_pair_key_is_symmetric() {
        assert_eq!(pair_key(3, 9), pair_key(9, 3));
        assert_eq!(pair_key(1, 2), (1 << 16) | 2);
    }

    #[test]
    fn test_same_cell_pairs_in_snapshot_order() {
        let mut grid = SpatialGrid::default();
        grid.rebuild([(5, 10.0, 10.0), (2, 20.0, 20.0), (9, 30.0, 30.0)]);

        assert_eq!(grid.cell_count(), 1);
        assert_eq!(grid.candidate_pairs(), vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_neighbouring_cells_paired_once() {
        let mut grid = SpatialGrid::default();
        // One car in each cell of a 3x3 block.
        let mut entries = Vec::new();
        let mut id = 1;
        for cx in 0..3 {
            for cy in 0..3 {
                entries.push((id, cx as f64 * 100.0 + 50.0, cy as f64 * 100.0 + 50.0));
                id += 1;
            }
        }
        grid.rebuild(entries.clone());
        let pairs = sorted(grid.candidate_pairs());

        let mut expected = Vec::new();
        for i in 0..entries.len() {
            for j in i + 1..entries.len() {
                let (ax, ay) = (entries[i].1 / 100.0, entries[i].2 / 100.0);
                let (bx, by) = (entries[j].1 / 100.0, entries[j].2 / 100.0);
                if (ax.floor() - bx.floor()).abs() <= 1.0 && (ay.floor() - by.floor()).abs() <= 1.0
                {
                    expected.push((i, j));
                }
            }
        }

        assert_eq!(pairs, expected);
        assert_eq!(pairs.len(), 20);
    }

    #[test]
    fn test_distant_cells_not_paired() {
        let mut grid = SpatialGrid::default();
        grid.rebuild([(1, 0.0, 0.0), (2, 250.0, 0.0), (3, 0.0, -250.0)]);
        assert!(grid.candidate_pairs().is_empty());
    }

    #[test]
    fn test_rebuild_discards_previous_contents() {
        let mut grid = SpatialGrid::default();
        grid.rebuild([(1, 0.0, 0.0), (2, 1.0, 1.0)]);
        assert_eq!(grid.candidate_pairs().len(), 1);

        grid.rebuild([(1, 0.0, 0.0)]);
        assert!(grid.candidate_pairs().is_empty());
    }

    #[test]
    fn test_base_cell_entry_comes_first_across_cells() {
        let mut grid = SpatialGrid::default();
        // Entry 0 sits in cell (1, 0), entry 1 in cell (0, 0).
        grid.rebuild([(1, 150.0, 50.0), (2, 90.0, 50.0)]);
        assert_eq!(grid.candidate_pairs(), vec![(1, 0)]);
    }
}
