use std::mem::size_of;

use crate::voxel_grid::grid::{self, CONTESTED, MATRIX, UNASSIGNED};

/// Format large numbers with KB, MB, GB, TB suffixes
fn format_bytes(bytes: usize) -> String {
	const KB: usize = 1024;
	const MB: usize = KB * 1024;
	const GB: usize = MB * 1024;
	const TB: usize = GB * 1024;

	if bytes >= TB {
		format!("{:.2} TB", bytes as f64 / TB as f64)
	} else if bytes >= GB {
		format!("{:.2} GB", bytes as f64 / GB as f64)
	} else if bytes >= MB {
		format!("{:.2} MB", bytes as f64 / MB as f64)
	} else if bytes >= KB {
		format!("{:.2} KB", bytes as f64 / KB as f64)
	} else {
		format!("{} bytes", bytes)
	}
}

/// Wrap a possibly out-of-range coordinate onto `0..len`
#[inline]
pub fn wrap_coord(value: isize, len: usize) -> usize {
	value.rem_euclid(len as isize) as usize
}

/// Convert (i, j, k) to a linear index for a grid of the given extents
#[inline]
pub fn linear_index(dims: [usize; 3], i: usize, j: usize, k: usize) -> usize {
	i + j * dims[0] + k * dims[0] * dims[1]
}

/// Resolve a signed lattice coordinate into a linear index.
/// Periodic lattices wrap, bounded lattices drop out-of-range cells.
#[inline]
pub fn resolve_index(dims: [usize; 3], periodic: bool, coord: [isize; 3]) -> Option<usize> {
	if periodic {
		let i = wrap_coord(coord[0], dims[0]);
		let j = wrap_coord(coord[1], dims[1]);
		let k = wrap_coord(coord[2], dims[2]);
		return Some(linear_index(dims, i, j, k));
	}
	for axis in 0..3 {
		if coord[axis] < 0 || coord[axis] as usize >= dims[axis] {
			return None;
		}
	}
	Some(linear_index(dims, coord[0] as usize, coord[1] as usize, coord[2] as usize))
}

impl grid::FeatureGrid {
	/// Log memory usage with a detailed breakdown
	pub fn report_memory(&self) {
		let struct_overhead = size_of::<Self>() - 2 * size_of::<Vec<i32>>();
		let id_bytes = self.feature_ids.capacity() * size_of::<i32>();
		let phase_bytes = self.phases.capacity() * size_of::<i32>();
		let total_memory = struct_overhead + id_bytes + phase_bytes;

		log::debug!("FeatureGrid memory report:");
		log::debug!("  Dimensions: {} x {} x {}", self.len_i, self.len_j, self.len_k);
		log::debug!("  Total Voxels: {:e}", self.total_voxels as f64);
		log::debug!(
			"  Spacing: {:.3} x {:.3} x {:.3}",
			self.spacing[0], self.spacing[1], self.spacing[2]
		);
		log::debug!("  Feature ids: {}", format_bytes(id_bytes));
		log::debug!("  Phase ids: {}", format_bytes(phase_bytes));
		log::debug!("  Total Memory Used: {}", format_bytes(total_memory));
	}

	#[inline]
	pub fn dims(&self) -> [usize; 3] {
		[self.len_i, self.len_j, self.len_k]
	}

	/// Convert (i, j, k) to a linear index
	#[inline]
	pub fn ijk_to_index(&self, i: usize, j: usize, k: usize) -> usize {
		i + j * self.len_i + k * self.len_i * self.len_j
	}

	/// Convert a linear index back to (i, j, k)
	#[inline]
	pub fn index_to_ijk(&self, index: usize) -> (usize, usize, usize) {
		let k = index / (self.len_i * self.len_j);
		let j = (index % (self.len_i * self.len_j)) / self.len_i;
		let i = index % self.len_i;
		(i, j, k)
	}

	/// Get a feature id using (i, j, k) coordinates
	#[inline]
	pub fn get_ijk(&self, i: usize, j: usize, k: usize) -> i32 {
		self.feature_ids[self.ijk_to_index(i, j, k)]
	}

	/// Linear indices of the (up to) six face neighbours of a voxel
	pub fn face_neighbors(&self, index: usize) -> [Option<usize>; 6] {
		let (i, j, k) = self.index_to_ijk(index);
		let dims = self.dims();
		let (i, j, k) = (i as isize, j as isize, k as isize);
		[
			resolve_index(dims, self.periodic, [i, j, k - 1]),
			resolve_index(dims, self.periodic, [i, j - 1, k]),
			resolve_index(dims, self.periodic, [i - 1, j, k]),
			resolve_index(dims, self.periodic, [i + 1, j, k]),
			resolve_index(dims, self.periodic, [i, j + 1, k]),
			resolve_index(dims, self.periodic, [i, j, k + 1]),
		]
	}

	/// Count voxels holding a real feature label
	pub fn count_assigned(&self) -> usize {
		self.feature_ids.iter().filter(|&&id| id > MATRIX).count()
	}

	/// Count voxels still waiting for a label (unclaimed or contested)
	pub fn count_pending(&self) -> usize {
		self.feature_ids
			.iter()
			.filter(|&&id| id == UNASSIGNED || id == CONTESTED)
			.count()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::voxel_grid::grid::FeatureGrid;

	#[test]
	fn index_round_trip() {
		let grid = FeatureGrid::new(4, 5, 6, [1.0; 3], false);
		for index in [0, 7, 33, grid.total_voxels - 1] {
			let (i, j, k) = grid.index_to_ijk(index);
			assert_eq!(grid.ijk_to_index(i, j, k), index);
		}
	}

	#[test]
	fn bounded_neighbors_drop_outside_cells() {
		let grid = FeatureGrid::new(3, 3, 3, [1.0; 3], false);
		let corner = grid.face_neighbors(0);
		assert_eq!(corner.iter().filter(|n| n.is_some()).count(), 3);
		let center = grid.face_neighbors(grid.ijk_to_index(1, 1, 1));
		assert!(center.iter().all(|n| n.is_some()));
	}

	#[test]
	fn periodic_neighbors_wrap() {
		let grid = FeatureGrid::new(3, 3, 3, [1.0; 3], true);
		let corner = grid.face_neighbors(0);
		assert!(corner.iter().all(|n| n.is_some()));
		assert!(corner.contains(&Some(grid.ijk_to_index(2, 0, 0))));
	}

	#[test]
	fn resolve_index_wraps_negative_coordinates() {
		assert_eq!(resolve_index([4, 4, 4], true, [-1, 0, 0]), Some(3));
		assert_eq!(resolve_index([4, 4, 4], false, [-1, 0, 0]), None);
		assert_eq!(resolve_index([4, 4, 4], true, [4, 4, 4]), Some(0));
	}
}
