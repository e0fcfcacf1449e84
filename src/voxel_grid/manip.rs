use bitvec::vec::BitVec;
use serde::Serialize;

use crate::packing::feature::Feature;
use crate::packing::optimizer::PrecipitateSites;
use crate::voxel_grid::geometry::Domain;
use crate::voxel_grid::grid::{FeatureGrid, MATRIX, UNASSIGNED};

/// What [`FeatureGrid::remove_fragments`] took away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FragmentReport {
	/// Detached pieces released because their feature has a larger one
	pub fragments: usize,
	/// Pieces released for being under their feature's minimum size
	pub undersized: usize,
	/// Voxels set back to unassigned
	pub released_voxels: usize,
}

impl FeatureGrid {
	/// Voxels holding a feature that touch a face neighbour with another label
	pub fn boundary_voxels(&self) -> BitVec {
		let mut boundary = BitVec::repeat(false, self.total_voxels);
		for index in 0..self.total_voxels {
			let id = self.feature_ids[index];
			if id <= MATRIX {
				continue;
			}
			let touches_other = self
				.face_neighbors(index)
				.into_iter()
				.flatten()
				.any(|neighbor| self.feature_ids[neighbor] != id);
			if touches_other {
				boundary.set(index, true);
			}
		}
		boundary
	}

	/// Split the eligible voxels into boundary and interior seed sites
	pub fn precipitate_sites(&self, domain: &Domain) -> PrecipitateSites {
		let boundary_bits = self.boundary_voxels();
		let mut boundary = Vec::new();
		let mut interior = Vec::new();
		for index in 0..self.total_voxels {
			if !domain.is_eligible(index) {
				continue;
			}
			if boundary_bits[index] {
				boundary.push(index);
			} else {
				interior.push(index);
			}
		}
		log::debug!("Precipitate sites: {} boundary, {} interior", boundary.len(), interior.len());
		PrecipitateSites { voxels: domain.voxel_lattice(), boundary, interior }
	}

	/// Face-connected piece of the feature at `seed`, and whether it reaches
	/// an outer face of the volume
	fn face_component(&self, seed: usize, visited: &mut BitVec) -> (Vec<usize>, bool) {
		let id = self.feature_ids[seed];
		let [ni, nj, nk] = self.dims();
		let mut piece = vec![seed];
		visited.set(seed, true);
		let mut touches_surface = false;
		let mut next = 0;
		while next < piece.len() {
			let index = piece[next];
			next += 1;
			let (i, j, k) = self.index_to_ijk(index);
			touches_surface |= i == 0 || j == 0 || k == 0 || i + 1 == ni || j + 1 == nj || k + 1 == nk;
			for neighbor in self.face_neighbors(index).into_iter().flatten() {
				if !visited[neighbor] && self.feature_ids[neighbor] == id {
					visited.set(neighbor, true);
					piece.push(neighbor);
				}
			}
		}
		(piece, touches_surface)
	}

	/// Keep only the largest face-connected piece of every feature.
	///
	/// Other pieces go back to unassigned. A feature's first piece is also
	/// released when it is smaller than `min_voxels[id - 1]` and does not
	/// touch the outer faces; ids past the end of `min_voxels` have no minimum.
	/// Run [`FeatureGrid::fill_gaps`] afterwards to relabel the released voxels.
	pub fn remove_fragments(&mut self, min_voxels: &[usize]) -> FragmentReport {
		let max_id = self.feature_ids.iter().copied().max().unwrap_or(MATRIX).max(MATRIX) as usize;
		let mut kept: Vec<Vec<usize>> = vec![Vec::new(); max_id + 1];
		let mut visited = BitVec::repeat(false, self.total_voxels);
		let mut report = FragmentReport::default();

		for seed in 0..self.total_voxels {
			let id = self.feature_ids[seed];
			if id <= MATRIX || visited[seed] {
				continue;
			}
			let slot = id as usize;
			let (piece, touches_surface) = self.face_component(seed, &mut visited);
			let released = if !kept[slot].is_empty() {
				report.fragments += 1;
				if piece.len() > kept[slot].len() {
					std::mem::replace(&mut kept[slot], piece)
				} else {
					piece
				}
			} else if touches_surface || piece.len() >= min_voxels.get(slot - 1).copied().unwrap_or(0) {
				kept[slot] = piece;
				continue;
			} else {
				report.undersized += 1;
				piece
			};
			report.released_voxels += released.len();
			for index in released {
				self.feature_ids[index] = UNASSIGNED;
			}
		}

		if report.released_voxels > 0 {
			log::info!(
				"Released {} voxels from {} detached and {} undersized feature pieces",
				report.released_voxels,
				report.fragments,
				report.undersized
			);
		}
		report
	}

	/// Voxel count per feature id (index 0 is the matrix)
	pub fn feature_voxel_counts(&self, features: usize) -> Vec<usize> {
		let mut counts = vec![0usize; features + 1];
		for &id in &self.feature_ids {
			if id >= MATRIX && (id as usize) <= features {
				counts[id as usize] += 1;
			}
		}
		counts
	}

	/// Drop features that ended up with no voxel and renumber the rest
	/// contiguously from 1, keeping their order. Returns how many were dropped.
	pub fn compact_feature_ids(&mut self, features: &mut Vec<Feature>) -> usize {
		let counts = self.feature_voxel_counts(features.len());
		let mut remap = vec![MATRIX; features.len() + 1];
		let mut next = 0;
		let mut index = 0;
		features.retain(|_| {
			index += 1;
			if counts[index] > 0 {
				next += 1;
				remap[index] = next;
				true
			} else {
				false
			}
		});
		for id in self.feature_ids.iter_mut() {
			if *id > MATRIX {
				*id = remap.get(*id as usize).copied().unwrap_or(MATRIX);
			}
		}
		let dropped = remap.len() - 1 - next as usize;
		if dropped > 0 {
			log::info!("Removed {} features that received no voxels", dropped);
		}
		dropped
	}

	/// Fill the phase map from the feature labels; matrix and pending voxels get phase 0
	pub fn derive_phases(&mut self, features: &[Feature]) {
		for (phase, &id) in self.phases.iter_mut().zip(&self.feature_ids) {
			*phase = if id > MATRIX {
				features.get(id as usize - 1).map_or(0, |f| f.phase as i32)
			} else {
				0
			};
		}
	}

	/// Voxel count per phase index
	pub fn phase_voxel_counts(&self, phases: usize) -> Vec<usize> {
		let mut counts = vec![0usize; phases + 1];
		for &phase in &self.phases {
			if phase >= 0 && (phase as usize) <= phases {
				counts[phase as usize] += 1;
			}
		}
		counts
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn feature(phase: usize) -> Feature {
		Feature {
			phase,
			equivalent_diameter: 1.0,
			volume: 0.5,
			axis_ratios: [1.0; 3],
			euler: [0.0; 3],
			omega3: 1.0,
			neighbor_count: 0,
			centroid: [0.0; 3],
		}
	}

	#[test]
	fn boundaries_sit_where_labels_change() {
		let mut grid = FeatureGrid::new(4, 1, 1, [1.0; 3], false);
		grid.feature_ids = vec![1, 1, 2, 2];
		let boundary = grid.boundary_voxels();
		assert_eq!(boundary.iter().by_vals().collect::<Vec<_>>(), vec![false, true, true, false]);

		grid.periodic = true;
		let boundary = grid.boundary_voxels();
		assert!(boundary.all());
	}

	#[test]
	fn compaction_drops_empty_features() {
		let mut grid = FeatureGrid::new(4, 1, 1, [1.0; 3], false);
		grid.feature_ids = vec![1, 3, 3, 0];
		let mut features = vec![feature(1), feature(1), feature(2)];
		let dropped = grid.compact_feature_ids(&mut features);
		assert_eq!(dropped, 1);
		assert_eq!(features.len(), 2);
		assert_eq!(grid.feature_ids, vec![1, 2, 2, 0]);
		grid.derive_phases(&features);
		assert_eq!(grid.phases, vec![1, 2, 2, 0]);
		assert_eq!(grid.phase_voxel_counts(2), vec![1, 1, 2]);
	}

	#[test]
	fn detached_pieces_are_released() {
		let mut grid = FeatureGrid::new(7, 1, 1, [1.0; 3], false);
		grid.feature_ids = vec![1, 1, 1, 2, 1, 2, 2];
		let report = grid.remove_fragments(&[0, 0]);
		assert_eq!(report, FragmentReport { fragments: 2, undersized: 0, released_voxels: 2 });
		assert_eq!(grid.feature_ids, vec![1, 1, 1, UNASSIGNED, UNASSIGNED, 2, 2]);

		grid.fill_gaps(false);
		assert_eq!(grid.count_pending(), 0);
		assert_eq!(grid.remove_fragments(&[0, 0]), FragmentReport::default());
	}

	#[test]
	fn later_larger_piece_wins() {
		let mut grid = FeatureGrid::new(6, 1, 1, [1.0; 3], false);
		grid.feature_ids = vec![3, 0, 3, 3, 3, 0];
		let report = grid.remove_fragments(&[]);
		assert_eq!(report.fragments, 1);
		assert_eq!(grid.feature_ids, vec![UNASSIGNED, 0, 3, 3, 3, 0]);
	}

	#[test]
	fn small_interior_pieces_are_dropped() {
		let mut grid = FeatureGrid::new(5, 5, 5, [1.0; 3], false);
		grid.feature_ids.fill(1);
		let center = grid.ijk_to_index(2, 2, 2);
		grid.feature_ids[center] = 2;
		let corner = grid.ijk_to_index(0, 0, 0);
		grid.feature_ids[corner] = 3;
		let report = grid.remove_fragments(&[0, 4, 4]);
		assert_eq!(report.undersized, 1);
		assert_eq!(grid.feature_ids[center], UNASSIGNED);
		// on the outer face: kept despite its size
		assert_eq!(grid.feature_ids[corner], 3);

		grid.fill_gaps(false);
		assert_eq!(grid.feature_ids[center], 1);
	}

	#[test]
	fn periodic_wrap_joins_pieces() {
		let mut grid = FeatureGrid::new(5, 1, 1, [1.0; 3], true);
		grid.feature_ids = vec![1, 2, 2, 2, 1];
		assert_eq!(grid.remove_fragments(&[]), FragmentReport::default());
		grid.periodic = false;
		assert_eq!(grid.remove_fragments(&[]).released_voxels, 1);
	}

	#[test]
	fn sites_split_boundary_and_interior() {
		let domain = Domain::new([4, 1, 1], [1.0; 3], false).unwrap();
		let mut grid = domain.build_grid();
		grid.feature_ids = vec![1, 1, 2, 2];
		let sites = grid.precipitate_sites(&domain);
		assert_eq!(sites.boundary, vec![1, 2]);
		assert_eq!(sites.interior, vec![0, 3]);
	}
}
