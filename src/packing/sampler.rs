use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Beta, Distribution, Normal};

use crate::packing::error::PackingError;
use crate::packing::feature::Feature;
use crate::packing::orientation::{OrientationSampler, pick_weighted_bin};
use crate::packing::shape::ShapeClass;
use crate::packing::stats::{BetaParams, PhaseStats};

/// Diameter draws outside the configured bounds before giving up
const MAX_DIAMETER_ATTEMPTS: usize = 10_000;
/// Redraws of c/a while it exceeds b/a
const MAX_RATIO_ATTEMPTS: usize = 100;
const MIN_AXIS_RATIO: f32 = 0.01;

/// Nearest usable entry of a per-bin table, searching outward from `bin`
/// (bin, bin-1, bin+1, bin-2, ...).
pub fn nearest_usable(table: &[BetaParams], bin: usize) -> Option<BetaParams> {
	if table.is_empty() {
		return None;
	}
	let start = bin.min(table.len() - 1);
	for distance in 0..table.len() {
		if let Some(below) = start.checked_sub(distance) {
			if table[below].is_usable() {
				return Some(table[below]);
			}
		}
		if distance > 0 {
			if let Some(above) = table.get(start + distance) {
				if above.is_usable() {
					return Some(*above);
				}
			}
		}
	}
	None
}

/// Draws candidate features from one phase's statistics.
pub struct ShapeSampler<'a> {
	phase: usize,
	stats: &'a PhaseStats,
	class: ShapeClass,
	size: Normal<f32>,
	orientation: &'a dyn OrientationSampler,
}

impl<'a> ShapeSampler<'a> {
	pub fn new(phase: usize, stats: &'a PhaseStats, orientation: &'a dyn OrientationSampler) -> Result<Self, PackingError> {
		let class = ShapeClass::try_from(stats.shape_type)?;
		let size = Normal::new(stats.size.mu, stats.size.sigma).map_err(|e| PackingError::InvalidStats {
			phase,
			reason: format!("size distribution: {}", e),
		})?;
		Ok(Self { phase, stats, class, size, orientation })
	}

	pub fn class(&self) -> ShapeClass {
		self.class
	}

	fn degenerate(&self, table: &'static str) -> PackingError {
		PackingError::DegenerateDistribution { phase: self.phase, table }
	}

	fn draw_beta(&self, table: &[BetaParams], bin: usize, name: &'static str, rng: &mut StdRng) -> Result<f32, PackingError> {
		let params = nearest_usable(table, bin).ok_or_else(|| self.degenerate(name))?;
		let beta = Beta::new(params.alpha, params.beta).map_err(|_| self.degenerate(name))?;
		Ok(beta.sample(rng))
	}

	/// Log-normal diameter inside `[min, max)`, by rejection
	pub fn sample_diameter(&self, rng: &mut StdRng) -> Result<f32, PackingError> {
		let min = self.stats.min_diameter();
		let max = self.stats.max_diameter();
		for _ in 0..MAX_DIAMETER_ATTEMPTS {
			let diameter = self.size.sample(rng).exp();
			if diameter >= min && diameter < max {
				return Ok(diameter);
			}
		}
		Err(self.degenerate("size"))
	}

	/// Draw one candidate feature (centroid left at the origin).
	pub fn sample(&self, rng: &mut StdRng) -> Result<Feature, PackingError> {
		let diameter = self.sample_diameter(rng)?;
		let bin = self.stats.size_bin(diameter);

		let b = self.draw_beta(&self.stats.b_over_a, bin, "b/a", rng)?;
		let mut c = self.draw_beta(&self.stats.c_over_a, bin, "c/a", rng)?;
		let mut attempts = 0;
		while c > b && attempts < MAX_RATIO_ATTEMPTS {
			c = self.draw_beta(&self.stats.c_over_a, bin, "c/a", rng)?;
			attempts += 1;
		}
		let (b, c) = if c > b { (c, b) } else { (b, c) };
		let axis_ratios = [1.0, b.clamp(MIN_AXIS_RATIO, 1.0), c.clamp(MIN_AXIS_RATIO, 1.0)];

		let odf_bin = pick_weighted_bin(&self.stats.axis_odf, rng)
			.unwrap_or_else(|| rng.random_range(0..self.orientation.bin_count().max(1)));
		let euler = self.orientation.euler_for_bin(odf_bin, rng);

		let omega3 = match self.class {
			ShapeClass::Ellipsoid => 1.0,
			_ => self.draw_beta(&self.stats.omega3, bin, "omega3", rng)?.clamp(0.0, 1.0),
		};

		Ok(Feature {
			phase: self.phase,
			equivalent_diameter: diameter,
			volume: Feature::sphere_volume(diameter),
			axis_ratios,
			euler,
			omega3,
			neighbor_count: 0,
			centroid: [0.0; 3],
		})
	}
}
