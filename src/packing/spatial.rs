use crate::packing::histogram::{bhattacharyya, bhattacharyya_2d, simulated_neighbor_distribution};
use crate::packing::stats::RdfTarget;

/// Separation `b - a`, using the nearest periodic image when `periodic`
#[inline]
pub fn separation(a: [f32; 3], b: [f32; 3], size: [f32; 3], periodic: bool) -> [f32; 3] {
	let mut d = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
	if periodic {
		for axis in 0..3 {
			let len = size[axis];
			if d[axis] > 0.5 * len {
				d[axis] -= len;
			} else if d[axis] < -0.5 * len {
				d[axis] += len;
			}
		}
	}
	d
}

#[inline]
pub fn distance(a: [f32; 3], b: [f32; 3], size: [f32; 3], periodic: bool) -> f32 {
	let d = separation(a, b, size, periodic);
	(d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
}

/// Bring a point back inside the domain (wrap or clamp)
pub fn fold_into_domain(mut p: [f32; 3], size: [f32; 3], periodic: bool) -> [f32; 3] {
	for axis in 0..3 {
		p[axis] = if periodic {
			p[axis].rem_euclid(size[axis])
		} else {
			p[axis].clamp(0.0, size[axis] * (1.0 - f32::EPSILON))
		};
	}
	p
}

/// Neighbour counts of the placed features of one phase. A feature's
/// neighbours are the others whose centroid lies in the axis-aligned box
/// of half-width equal to its equivalent diameter.
#[derive(Debug, Clone)]
pub struct NeighborTracker {
	size: [f32; 3],
	periodic: bool,
	diameters: Vec<f32>,
	size_bins: Vec<usize>,
	positions: Vec<Option<[f32; 3]>>,
	counts: Vec<usize>,
}

impl NeighborTracker {
	pub fn new(size: [f32; 3], periodic: bool, diameters: Vec<f32>, size_bins: Vec<usize>) -> Self {
		let n = diameters.len();
		Self {
			size,
			periodic,
			diameters,
			size_bins,
			positions: vec![None; n],
			counts: vec![0; n],
		}
	}

	fn sees(&self, viewer: usize, at: [f32; 3], other: [f32; 3]) -> bool {
		let half = self.diameters[viewer];
		let d = separation(at, other, self.size, self.periodic);
		d.iter().all(|c| c.abs() <= half)
	}

	pub fn place(&mut self, index: usize, at: [f32; 3]) {
		self.unplace(index);
		for other in 0..self.positions.len() {
			if other == index {
				continue;
			}
			if let Some(pos) = self.positions[other] {
				if self.sees(index, at, pos) {
					self.counts[index] += 1;
				}
				if self.sees(other, pos, at) {
					self.counts[other] += 1;
				}
			}
		}
		self.positions[index] = Some(at);
	}

	pub fn unplace(&mut self, index: usize) -> Option<[f32; 3]> {
		let at = self.positions[index].take()?;
		for other in 0..self.positions.len() {
			if let Some(pos) = self.positions[other] {
				if self.sees(other, pos, at) {
					self.counts[other] -= 1;
				}
			}
		}
		self.counts[index] = 0;
		Some(at)
	}

	pub fn counts(&self) -> &[usize] {
		&self.counts
	}

	/// Simulated neighbour table with `rows` size bins
	pub fn distribution(&self, rows: usize) -> Vec<Vec<f32>> {
		simulated_neighbor_distribution(
			rows,
			(0..self.positions.len())
				.filter(|&i| self.positions[i].is_some())
				.map(|i| (self.size_bins[i], self.counts[i])),
		)
	}

	pub fn similarity(&self, target: &[Vec<f32>]) -> f32 {
		bhattacharyya_2d(&self.distribution(target.len()), target)
	}
}

/// Pairwise centroid distance histogram of the placed precipitates of
/// one phase, kept up to date as they move.
#[derive(Debug, Clone)]
pub struct RdfTracker {
	size: [f32; 3],
	periodic: bool,
	min_distance: f32,
	step: f32,
	target: Vec<f32>,
	counts: Vec<f32>,
	positions: Vec<Option<[f32; 3]>>,
}

impl RdfTracker {
	/// The simulated histogram keeps the target's step but runs out to
	/// `max_distance` (the domain diagonal) when that is further.
	pub fn new(target: &RdfTarget, features: usize, size: [f32; 3], periodic: bool, max_distance: f32) -> Self {
		let step = target.step();
		let reach = max_distance.max(target.max_distance);
		let bins = (((reach - target.min_distance) / step).ceil() as usize).max(target.bin_count());
		Self {
			size,
			periodic,
			min_distance: target.min_distance,
			step,
			target: target.frequencies.clone(),
			counts: vec![0.0; bins],
			positions: vec![None; features],
		}
	}

	/// Histogram bin of a distance; anything below the minimum goes to bin 0
	pub fn bin(&self, dist: f32) -> usize {
		if dist < self.min_distance {
			return 0;
		}
		(((dist - self.min_distance) / self.step).floor() as usize).min(self.counts.len() - 1)
	}

	fn accumulate(&mut self, index: usize, at: [f32; 3], weight: f32) {
		for other in 0..self.positions.len() {
			if other == index {
				continue;
			}
			if let Some(pos) = self.positions[other] {
				let bin = self.bin(distance(at, pos, self.size, self.periodic));
				self.counts[bin] = (self.counts[bin] + weight).max(0.0);
			}
		}
	}

	pub fn place(&mut self, index: usize, at: [f32; 3]) {
		self.unplace(index);
		self.accumulate(index, at, 1.0);
		self.positions[index] = Some(at);
	}

	pub fn unplace(&mut self, index: usize) -> Option<[f32; 3]> {
		let at = self.positions[index].take()?;
		self.accumulate(index, at, -1.0);
		Some(at)
	}

	pub fn counts(&self) -> &[f32] {
		&self.counts
	}

	pub fn similarity(&self) -> f32 {
		bhattacharyya(&self.counts, &self.target)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_relative_eq;

	#[test]
	fn minimum_image_separation() {
		let d = separation([0.5, 0.0, 0.0], [9.5, 0.0, 0.0], [10.0; 3], true);
		assert_relative_eq!(d[0], -1.0);
		let d = separation([0.5, 0.0, 0.0], [9.5, 0.0, 0.0], [10.0; 3], false);
		assert_relative_eq!(d[0], 9.0);
	}

	#[test]
	fn fold_wraps_or_clamps() {
		assert_eq!(fold_into_domain([-1.0, 11.0, 5.0], [10.0; 3], true), [9.0, 1.0, 5.0]);
		let clamped = fold_into_domain([-1.0, 11.0, 5.0], [10.0; 3], false);
		assert_eq!(clamped[0], 0.0);
		assert!(clamped[1] < 10.0);
	}

	#[test]
	fn neighbor_boxes_scale_with_diameter() {
		// a big feature sees a small one that does not see it back
		let mut tracker = NeighborTracker::new([100.0; 3], false, vec![10.0, 2.0], vec![0, 0]);
		tracker.place(0, [50.0, 50.0, 50.0]);
		tracker.place(1, [55.0, 50.0, 50.0]);
		assert_eq!(tracker.counts(), &[1, 0]);
		tracker.place(1, [51.0, 50.0, 50.0]);
		assert_eq!(tracker.counts(), &[1, 1]);
		tracker.unplace(0);
		assert_eq!(tracker.counts(), &[0, 0]);
	}

	#[test]
	fn rdf_tracker_matches_target_spacing() {
		let target = RdfTarget { min_distance: 2.0, max_distance: 10.0, frequencies: vec![0.1, 0.3, 0.4, 0.2] };
		let mut rdf = RdfTracker::new(&target, 3, [20.0; 3], false, 34.6);
		assert_eq!(rdf.bin(1.0), 0);
		assert_eq!(rdf.bin(4.5), 1);
		assert!(rdf.counts().len() > 4);
		rdf.place(0, [1.0, 1.0, 1.0]);
		rdf.place(1, [6.0, 1.0, 1.0]);
		rdf.place(2, [1.0, 8.0, 1.0]);
		assert_eq!(rdf.counts().iter().sum::<f32>(), 3.0);
		rdf.unplace(2);
		assert_eq!(rdf.counts().iter().sum::<f32>(), 1.0);
		assert_eq!(rdf.counts()[rdf.bin(5.0)], 1.0);
	}
}
