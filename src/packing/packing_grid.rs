use rand::Rng;
use rand::rngs::StdRng;

use crate::voxel_grid::geometry::Lattice;

const NOT_AVAILABLE: usize = usize::MAX;

/// Coarse occupancy grid used while features are placed.
///
/// Each cell counts the features claiming it. Cells with no owner are
/// kept in a compact list so a random free cell can be drawn in O(1).
/// The filling error `sum((owners - 1)^2) / cells` is kept as an exact
/// integer sum and updated on every insert/remove.
#[derive(Debug, Clone)]
pub struct PackingGrid {
	lattice: Lattice,
	owners: Vec<i32>,
	available: Vec<usize>,
	position: Vec<usize>,
	claims: Vec<Option<Vec<usize>>>,
	error_sum: i64,
	fallback_warned: bool,
}

impl PackingGrid {
	pub fn new(lattice: Lattice) -> Self {
		let cells = lattice.total_cells();
		Self {
			lattice,
			owners: vec![0; cells],
			available: (0..cells).collect(),
			position: (0..cells).collect(),
			claims: Vec::new(),
			error_sum: cells as i64,
			fallback_warned: false,
		}
	}

	pub fn lattice(&self) -> &Lattice {
		&self.lattice
	}

	pub fn total_cells(&self) -> usize {
		self.owners.len()
	}

	#[inline]
	pub fn owners(&self, cell: usize) -> i32 {
		self.owners[cell]
	}

	#[inline]
	pub fn is_available(&self, cell: usize) -> bool {
		self.position[cell] != NOT_AVAILABLE
	}

	pub fn available_count(&self) -> usize {
		self.available.len()
	}

	pub fn available_cells(&self) -> &[usize] {
		&self.available
	}

	/// Cells currently claimed by `feature_id`
	pub fn cells_of(&self, feature_id: usize) -> Option<&[usize]> {
		self.claims.get(feature_id).and_then(|c| c.as_deref())
	}

	fn take_available(&mut self, cell: usize) {
		let slot = self.position[cell];
		let last = self.available.len() - 1;
		self.available.swap(slot, last);
		let moved = self.available[slot];
		self.position[moved] = slot;
		self.available.pop();
		self.position[cell] = NOT_AVAILABLE;
	}

	fn restore_available(&mut self, cell: usize) {
		self.position[cell] = self.available.len();
		self.available.push(cell);
	}

	/// Claim `cells` for `feature_id`, replacing any earlier claim it held.
	pub fn insert(&mut self, feature_id: usize, cells: Vec<usize>) {
		if self.cells_of(feature_id).is_some() {
			self.remove(feature_id);
		}
		for &cell in &cells {
			let before = self.owners[cell];
			self.error_sum += 2 * before as i64 - 1;
			self.owners[cell] = before + 1;
			if before == 0 {
				self.take_available(cell);
			}
		}
		if self.claims.len() <= feature_id {
			self.claims.resize(feature_id + 1, None);
		}
		self.claims[feature_id] = Some(cells);
	}

	/// Release the cells held by `feature_id` and hand them back.
	pub fn remove(&mut self, feature_id: usize) -> Option<Vec<usize>> {
		let cells = self.claims.get_mut(feature_id)?.take()?;
		for &cell in &cells {
			let before = self.owners[cell];
			self.error_sum += 3 - 2 * before as i64;
			self.owners[cell] = before - 1;
			if before == 1 {
				self.restore_available(cell);
			}
		}
		Some(cells)
	}

	/// Sum of `(owners - 1)^2` over all cells divided by the cell count.
	/// An empty grid scores 1.0, a perfect tiling 0.0.
	pub fn filling_error(&self) -> f32 {
		self.error_sum as f32 / self.total_cells() as f32
	}

	/// Overlap part of the filling error (claimed cells only)
	pub fn overlap_error(&self) -> f32 {
		(self.error_sum - self.available.len() as i64) as f32 / self.total_cells() as f32
	}

	/// Uniformly random unclaimed cell. A fully claimed grid falls back to
	/// any cell.
	pub fn pick_random_available_cell(&mut self, rng: &mut StdRng) -> usize {
		if self.available.is_empty() {
			if !self.fallback_warned {
				log::warn!("No available packing cell left, ignoring exclusion zones");
				self.fallback_warned = true;
			}
			return rng.random_range(0..self.total_cells());
		}
		self.available[rng.random_range(0..self.available.len())]
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::packing::feature::Feature;
	use crate::packing::shape::{FeatureShape, ShapeClass};
	use rand::SeedableRng;

	fn lattice(dims: [usize; 3], periodic: bool) -> Lattice {
		Lattice { dims, spacing: [1.0; 3], periodic }
	}

	fn check_index(grid: &PackingGrid) {
		let mut expected: Vec<usize> = (0..grid.total_cells()).filter(|&c| grid.owners(c) == 0).collect();
		let mut actual = grid.available_cells().to_vec();
		expected.sort_unstable();
		actual.sort_unstable();
		assert_eq!(expected, actual);
		for (slot, &cell) in grid.available_cells().iter().enumerate() {
			assert_eq!(grid.position[cell], slot);
		}
	}

	#[test]
	fn empty_grid_has_unit_error() {
		let grid = PackingGrid::new(lattice([4, 4, 4], false));
		assert_eq!(grid.filling_error(), 1.0);
		assert_eq!(grid.overlap_error(), 0.0);
	}

	#[test]
	fn insert_then_remove_restores_error() {
		let mut grid = PackingGrid::new(lattice([5, 5, 5], false));
		grid.insert(1, vec![0, 1, 2, 3]);
		let before = grid.filling_error();
		grid.insert(2, vec![2, 3, 4, 5, 6]);
		assert!(grid.filling_error() != before);
		grid.remove(2);
		assert_eq!(grid.filling_error(), before);
		check_index(&grid);
	}

	#[test]
	fn overlap_counts_quadratically() {
		let mut grid = PackingGrid::new(lattice([2, 1, 1], false));
		grid.insert(1, vec![0, 1]);
		assert_eq!(grid.filling_error(), 0.0);
		grid.insert(2, vec![0]);
		grid.insert(3, vec![0]);
		// cell 0 has 3 owners -> (3-1)^2 = 4
		assert_eq!(grid.filling_error(), 2.0);
		assert_eq!(grid.remove(3), Some(vec![0]));
		assert_eq!(grid.filling_error(), 0.5);
	}

	#[test]
	fn separated_ellipsoids_do_not_overlap() {
		let lat = lattice([80, 20, 20], false);
		let mut grid = PackingGrid::new(lat);
		let feature = Feature {
			phase: 1,
			equivalent_diameter: 10.0,
			volume: Feature::sphere_volume(10.0),
			axis_ratios: [1.0, 0.8, 0.7],
			euler: [0.3, 0.2, 0.1],
			omega3: 1.0,
			neighbor_count: 0,
			centroid: [0.0; 3],
		};
		let shape = FeatureShape::new(ShapeClass::Ellipsoid, &feature);
		let first: Vec<usize> = shape.rasterize([15.5, 10.5, 10.5], &lat).iter().map(|h| h.index).collect();
		let second: Vec<usize> = shape.rasterize([65.5, 10.5, 10.5], &lat).iter().map(|h| h.index).collect();
		let claimed = first.len() + second.len();
		grid.insert(1, first);
		grid.insert(2, second);
		assert_eq!(grid.overlap_error(), 0.0);
		let total = grid.total_cells();
		assert_eq!(grid.filling_error(), (total - claimed) as f32 / total as f32);
	}

	#[test]
	fn available_index_tracks_random_sequences() {
		let mut grid = PackingGrid::new(lattice([6, 6, 6], true));
		let mut rng = StdRng::seed_from_u64(9);
		for step in 0..300 {
			let feature = rng.random_range(1..12);
			if rng.random_bool(0.6) {
				let start = rng.random_range(0..grid.total_cells());
				let len = rng.random_range(1..30);
				let cells: Vec<usize> = (start..start + len).map(|c| c % grid.total_cells()).collect();
				grid.insert(feature, cells);
			} else {
				grid.remove(feature);
			}
			if step % 25 == 0 {
				check_index(&grid);
			}
		}
		check_index(&grid);
		for feature in 1..12 {
			grid.remove(feature);
		}
		assert_eq!(grid.filling_error(), 1.0);
		assert_eq!(grid.available_count(), grid.total_cells());
	}

	#[test]
	fn full_grid_falls_back_to_any_cell() {
		let mut grid = PackingGrid::new(lattice([2, 2, 1], false));
		grid.insert(1, vec![0, 1, 2, 3]);
		let mut rng = StdRng::seed_from_u64(0);
		assert_eq!(grid.available_count(), 0);
		assert!(grid.pick_random_available_cell(&mut rng) < 4);
		grid.remove(1);
		let cell = grid.pick_random_available_cell(&mut rng);
		assert!(grid.is_available(cell));
	}
}
