use serde::Serialize;

use crate::voxel_grid::grid::{CONTESTED, FeatureGrid, MATRIX, UNASSIGNED};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GapFillReport {
	/// Passes that resolved at least one voxel
	pub passes: usize,
	pub resolved: usize,
	/// Voxels still without a feature when filling stopped
	pub remaining: usize,
	pub stalled: bool,
}

#[inline]
fn is_pending(id: i32) -> bool {
	id == UNASSIGNED || id == CONTESTED
}

impl FeatureGrid {
	/// Most frequent live label among the face neighbours of `index`
	/// (ties go to the smaller id). `None` when no neighbour is live.
	fn majority_neighbor(&self, index: usize) -> Option<i32> {
		let mut labels = [0i32; 6];
		let mut count = 0;
		for neighbor in self.face_neighbors(index).into_iter().flatten() {
			let id = self.feature_ids[neighbor];
			if id > MATRIX {
				labels[count] = id;
				count += 1;
			}
		}
		let labels = &mut labels[..count];
		labels.sort_unstable();
		let mut best: Option<(i32, usize)> = None;
		let mut run_start = 0;
		for i in 1..=labels.len() {
			if i == labels.len() || labels[i] != labels[run_start] {
				let run = i - run_start;
				if best.is_none_or(|(_, n)| run > n) {
					best = Some((labels[run_start], run));
				}
				run_start = i;
			}
		}
		best.map(|(label, _)| label)
	}

	/// Resolve unassigned and contested voxels by 6-neighbour majority vote.
	///
	/// Every pass votes on the labels left by the previous one. Filling stops
	/// once nothing is pending or a pass resolves nothing; leftovers then
	/// become matrix when `residual_to_matrix` is set and stay unassigned
	/// otherwise.
	pub fn fill_gaps(&mut self, residual_to_matrix: bool) -> GapFillReport {
		let mut pending: Vec<usize> = (0..self.total_voxels).filter(|&i| is_pending(self.feature_ids[i])).collect();
		let mut report = GapFillReport::default();

		while !pending.is_empty() {
			let updates: Vec<(usize, i32)> = pending
				.iter()
				.filter_map(|&index| self.majority_neighbor(index).map(|label| (index, label)))
				.collect();
			if updates.is_empty() {
				report.stalled = true;
				break;
			}
			for &(index, label) in &updates {
				self.feature_ids[index] = label;
			}
			report.passes += 1;
			report.resolved += updates.len();
			pending.retain(|&index| is_pending(self.feature_ids[index]));
			log::trace!("Gap fill pass {}: {} resolved, {} pending", report.passes, updates.len(), pending.len());
		}

		report.remaining = pending.len();
		if report.stalled {
			log::warn!("Gap fill stalled with {} voxels unresolved", report.remaining);
			let residual = if residual_to_matrix { MATRIX } else { UNASSIGNED };
			for &index in &pending {
				self.feature_ids[index] = residual;
			}
		}
		log::debug!(
			"Gap fill: {} voxels resolved in {} passes, {} remaining",
			report.resolved,
			report.passes,
			report.remaining
		);
		report
	}
}
