use std::thread;

use serde::Serialize;

use crate::packing::shape::{CellHit, FeatureShape};
use crate::voxel_grid::geometry::Domain;
use crate::voxel_grid::grid::{CONTESTED, FeatureGrid};
use crate::voxel_grid::info::progress_bar;

/// Outcome of one assignment pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentStats {
	/// Voxels claimed by at least one feature of the pass
	pub claimed: usize,
	/// Voxels left contested by an exact score tie
	pub contested: usize,
}

/// Rasterize every shape at full voxel resolution, in parallel over
/// chunks of features. Each worker only builds its own features' hit lists.
pub fn compute_footprints(
	shapes: &[(FeatureShape, [f32; 3])],
	domain: &Domain,
	threads: usize,
	show_progress: bool,
) -> Vec<Vec<CellHit>> {
	if shapes.is_empty() {
		return Vec::new();
	}
	let lattice = domain.voxel_lattice();
	let threads = threads.max(1);
	let chunk_size = shapes.len().div_ceil(threads);
	let pb = progress_bar(shapes.len() as u64, "Rasterizing features", show_progress);

	let footprints: Vec<Vec<CellHit>> = thread::scope(|scope| {
		let handles: Vec<_> = shapes
			.chunks(chunk_size)
			.map(|chunk| {
				let pb = pb.clone();
				scope.spawn(move || {
					chunk
						.iter()
						.map(|(shape, centroid)| {
							let hits = shape.rasterize(*centroid, &lattice);
							pb.inc(1);
							hits
						})
						.collect::<Vec<_>>()
				})
			})
			.collect();

		handles
			.into_iter()
			.flat_map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
			.collect()
	});
	pb.finish_and_clear();
	footprints
}

impl FeatureGrid {
	/// Write a pass of features into the grid; shape `n` gets id `first_id + n`.
	///
	/// Within the pass a voxel goes to the first feature claiming it unless a
	/// later one scores strictly higher; an exact tie marks it `CONTESTED`.
	/// Labels left by earlier passes are replaced by any claim, and voxels
	/// outside the domain mask are never written.
	pub fn assign_features(
		&mut self,
		shapes: &[(FeatureShape, [f32; 3])],
		first_id: i32,
		domain: &Domain,
		threads: usize,
		show_progress: bool,
	) -> AssignmentStats {
		let footprints = compute_footprints(shapes, domain, threads, show_progress);
		let mut best = vec![f32::NEG_INFINITY; self.total_voxels];
		let mut stats = AssignmentStats::default();

		for (offset, hits) in footprints.iter().enumerate() {
			let id = first_id + offset as i32;
			for hit in hits {
				if !domain.is_eligible(hit.index) {
					continue;
				}
				let previous = best[hit.index];
				if previous == f32::NEG_INFINITY {
					stats.claimed += 1;
					best[hit.index] = hit.score;
					self.feature_ids[hit.index] = id;
				} else if hit.score > previous {
					best[hit.index] = hit.score;
					self.feature_ids[hit.index] = id;
				} else if hit.score == previous {
					self.feature_ids[hit.index] = CONTESTED;
				}
			}
		}

		stats.contested = self.feature_ids.iter().filter(|&&id| id == CONTESTED).count();
		log::debug!(
			"Assigned {} features: {} voxels claimed, {} contested",
			shapes.len(),
			stats.claimed,
			stats.contested
		);
		stats
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::packing::feature::Feature;
	use crate::packing::shape::ShapeClass;
	use crate::voxel_grid::grid::{MATRIX, UNASSIGNED};
	use bitvec::prelude::*;

	fn ball(diameter: f32) -> FeatureShape {
		let feature = Feature {
			phase: 1,
			equivalent_diameter: diameter,
			volume: Feature::sphere_volume(diameter),
			axis_ratios: [1.0; 3],
			euler: [0.0; 3],
			omega3: 1.0,
			neighbor_count: 0,
			centroid: [0.0; 3],
		};
		FeatureShape::new(ShapeClass::Ellipsoid, &feature)
	}

	#[test]
	fn higher_membership_wins_overlaps() {
		let domain = Domain::new([12, 6, 6], [1.0; 3], false).unwrap();
		let mut grid = domain.build_grid();
		let shapes = [(ball(6.0), [4.0, 3.0, 3.0]), (ball(6.0), [8.0, 3.0, 3.0])];
		grid.assign_features(&shapes, 1, &domain, 2, false);
		// x = 5.5 is closer to the first centroid, x = 6.5 to the second
		assert_eq!(grid.get_ijk(5, 2, 2), 1);
		assert_eq!(grid.get_ijk(6, 2, 2), 2);
		assert_eq!(grid.get_ijk(11, 0, 0), UNASSIGNED);
	}

	#[test]
	fn exact_ties_are_contested() {
		let domain = Domain::new([8, 8, 8], [1.0; 3], false).unwrap();
		let mut grid = domain.build_grid();
		let shapes = [(ball(4.0), [4.0, 4.0, 4.0]), (ball(4.0), [4.0, 4.0, 4.0])];
		let stats = grid.assign_features(&shapes, 1, &domain, 1, false);
		assert!(stats.contested > 0);
		assert_eq!(stats.claimed, stats.contested);
		assert_eq!(grid.count_assigned(), 0);
	}

	#[test]
	fn later_pass_replaces_labels_but_respects_mask() {
		let mut mask = bitvec![1; 8 * 8 * 8];
		let masked = 4 + 4 * 8 + 4 * 64;
		mask.set(masked, false);
		let domain = Domain::new([8, 8, 8], [1.0; 3], false).unwrap().with_mask(mask).unwrap();
		let mut grid = domain.build_grid();
		grid.assign_features(&[(ball(8.0), [4.0, 4.0, 4.0])], 1, &domain, 4, false);
		assert_eq!(grid.get_ijk(3, 3, 3), 1);
		grid.assign_features(&[(ball(2.0), [4.0, 4.0, 4.0])], 2, &domain, 4, false);
		assert_eq!(grid.get_ijk(3, 3, 3), 2);
		assert_eq!(grid.feature_ids[masked], MATRIX);
	}

	#[test]
	fn footprints_keep_feature_order_across_threads() {
		let domain = Domain::new([20, 20, 20], [1.0; 3], true).unwrap();
		let shapes: Vec<_> = (0..9).map(|n| (ball(1.0 + n as f32 * 0.5), [10.0, 10.0, 10.0])).collect();
		let serial = compute_footprints(&shapes, &domain, 1, false);
		let parallel = compute_footprints(&shapes, &domain, 4, false);
		assert_eq!(serial, parallel);
		for pair in serial.windows(2) {
			assert!(pair[0].len() <= pair[1].len());
		}
	}
}
