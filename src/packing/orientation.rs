use std::f32::consts::FRAC_PI_2;

use rand::Rng;
use rand::rngs::StdRng;

/// Turns a discrete orientation bin into Euler angles.
pub trait OrientationSampler {
	/// Number of bins the sampler understands
	fn bin_count(&self) -> usize;

	/// Euler angles (radians) for `bin`, jittered inside the bin
	fn euler_for_bin(&self, bin: usize, rng: &mut StdRng) -> [f32; 3];
}

/// Orthorhombic axis ODF: 36 bins per Euler angle over [0, pi/2].
#[derive(Debug, Clone, Copy)]
pub struct OrthorhombicAxisSampler {
	pub bins_per_angle: usize,
}

impl Default for OrthorhombicAxisSampler {
	fn default() -> Self {
		Self { bins_per_angle: 36 }
	}
}

impl OrientationSampler for OrthorhombicAxisSampler {
	fn bin_count(&self) -> usize {
		self.bins_per_angle.pow(3)
	}

	fn euler_for_bin(&self, bin: usize, rng: &mut StdRng) -> [f32; 3] {
		let n = self.bins_per_angle.max(1);
		let bin = bin % self.bin_count().max(1);
		let step = FRAC_PI_2 / n as f32;
		let idx = [bin % n, (bin / n) % n, bin / (n * n)];
		idx.map(|i| (i as f32 + rng.random::<f32>()) * step)
	}
}

/// Inverse-CDF draw of a bin from non-negative weights.
/// Returns `None` when the weights are empty or sum to zero.
pub fn pick_weighted_bin(weights: &[f32], rng: &mut StdRng) -> Option<usize> {
	let total: f32 = weights.iter().sum();
	if weights.is_empty() || !(total > 0.0) {
		return None;
	}
	let target = rng.random::<f32>() * total;
	let mut cumulative = 0.0;
	for (bin, &w) in weights.iter().enumerate() {
		cumulative += w;
		if target < cumulative {
			return Some(bin);
		}
	}
	// rounding can leave target == total; take the last weighted bin
	weights.iter().rposition(|&w| w > 0.0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;

	#[test]
	fn weighted_pick_skips_empty_bins() {
		let mut rng = StdRng::seed_from_u64(3);
		for _ in 0..200 {
			let bin = pick_weighted_bin(&[0.0, 2.0, 0.0, 1.0], &mut rng).unwrap();
			assert!(bin == 1 || bin == 3);
		}
		assert_eq!(pick_weighted_bin(&[0.0, 0.0], &mut rng), None);
		assert_eq!(pick_weighted_bin(&[], &mut rng), None);
	}

	#[test]
	fn euler_angles_stay_in_bin() {
		let sampler = OrthorhombicAxisSampler::default();
		let mut rng = StdRng::seed_from_u64(11);
		let step = FRAC_PI_2 / 36.0;
		let bin = 5 + 7 * 36 + 35 * 36 * 36;
		for _ in 0..50 {
			let e = sampler.euler_for_bin(bin, &mut rng);
			assert!(e[0] >= 5.0 * step && e[0] <= 6.0 * step);
			assert!(e[1] >= 7.0 * step && e[1] <= 8.0 * step);
			assert!(e[2] >= 35.0 * step && e[2] <= FRAC_PI_2 + 1e-6);
		}
	}
}
