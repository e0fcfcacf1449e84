use statrs::function::erf::erf;

use crate::packing::stats::{LogNormal, PhaseStats};

/// Bins of the size and neighbour-count distributions
pub const DISTRIBUTION_BINS: usize = 40;
/// Neighbour counts covered by one neighbour bin
pub const NEIGHBOR_BIN_WIDTH: usize = 2;

/// Log-normal cumulative distribution at `x`
pub fn lognormal_cdf(dist: LogNormal, x: f32) -> f64 {
	if x <= 0.0 {
		return 0.0;
	}
	let ln = (x as f64).ln();
	let mu = dist.mu as f64;
	let sigma = dist.sigma as f64;
	if sigma <= 0.0 {
		return if ln >= mu { 1.0 } else { 0.0 };
	}
	0.5 * (1.0 + erf((ln - mu) / (sigma * std::f64::consts::SQRT_2)))
}

/// Bhattacharyya similarity of two histograms, each normalized on its own.
/// The shorter one is zero-padded; empty or all-zero inputs give 0.
pub fn bhattacharyya(sim: &[f32], target: &[f32]) -> f32 {
	let sim_total: f64 = sim.iter().map(|&v| v as f64).sum();
	let target_total: f64 = target.iter().map(|&v| v as f64).sum();
	if !(sim_total > 0.0) || !(target_total > 0.0) {
		return 0.0;
	}
	let bins = sim.len().max(target.len());
	let mut total = 0.0f64;
	for bin in 0..bins {
		let p = sim.get(bin).copied().unwrap_or(0.0) as f64 / sim_total;
		let q = target.get(bin).copied().unwrap_or(0.0) as f64 / target_total;
		if p > 0.0 && q > 0.0 {
			total += (p * q).sqrt();
		}
	}
	total as f32
}

/// Similarity of conditional tables (one row per size bin): per-row
/// similarity weighted by the target row masses.
pub fn bhattacharyya_2d(sim: &[Vec<f32>], target: &[Vec<f32>]) -> f32 {
	let weights: Vec<f64> = target.iter().map(|row| row.iter().map(|&v| v as f64).sum()).collect();
	let total: f64 = weights.iter().sum();
	if !(total > 0.0) {
		return 0.0;
	}
	let mut similarity = 0.0f64;
	for (index, (row, weight)) in target.iter().zip(&weights).enumerate() {
		if *weight <= 0.0 {
			continue;
		}
		if let Some(sim_row) = sim.get(index) {
			similarity += weight / total * bhattacharyya(sim_row, row) as f64;
		}
	}
	similarity as f32
}

/// Mean 2-D similarity over several phases (phase x size bin x neighbour bin)
pub fn bhattacharyya_3d(sim: &[Vec<Vec<f32>>], target: &[Vec<Vec<f32>>]) -> f32 {
	let phases = sim.len().min(target.len());
	if phases == 0 {
		return 0.0;
	}
	let total: f32 = sim.iter().zip(target).map(|(s, t)| bhattacharyya_2d(s, t)).sum();
	total / phases as f32
}

/// Binning shared by the target and simulated size distributions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeBinning {
	pub start: f32,
	pub step: f32,
}

impl SizeBinning {
	pub fn for_phase(stats: &PhaseStats) -> Self {
		let min = stats.min_diameter();
		let max = stats.max_diameter();
		Self {
			start: min / 2.0,
			step: (2.0 * max - min / 2.0) / DISTRIBUTION_BINS as f32,
		}
	}

	pub fn bin(&self, diameter: f32) -> usize {
		let raw = ((diameter - self.start) / self.step).floor();
		(raw.max(0.0) as usize).min(DISTRIBUTION_BINS - 1)
	}
}

/// Target size histogram from the phase's log-normal
pub fn target_size_distribution(stats: &PhaseStats) -> Vec<f32> {
	let binning = SizeBinning::for_phase(stats);
	let mut out = Vec::with_capacity(DISTRIBUTION_BINS);
	let mut previous = 0.0;
	for bin in 0..DISTRIBUTION_BINS {
		let edge = (bin + 1) as f32 * binning.step + binning.start;
		let cdf = lognormal_cdf(stats.size, edge);
		out.push((cdf - previous) as f32);
		previous = cdf;
	}
	out
}

/// Running size histogram of a phase being generated.
#[derive(Debug, Clone)]
pub struct SizeDistribution {
	binning: SizeBinning,
	target: Vec<f32>,
	counts: Vec<f32>,
}

impl SizeDistribution {
	pub fn new(stats: &PhaseStats) -> Self {
		Self {
			binning: SizeBinning::for_phase(stats),
			target: target_size_distribution(stats),
			counts: vec![0.0; DISTRIBUTION_BINS],
		}
	}

	pub fn add(&mut self, diameter: f32) {
		self.counts[self.binning.bin(diameter)] += 1.0;
	}

	pub fn remove(&mut self, diameter: f32) {
		let bin = self.binning.bin(diameter);
		self.counts[bin] = (self.counts[bin] - 1.0).max(0.0);
	}

	pub fn similarity(&self) -> f32 {
		bhattacharyya(&self.counts, &self.target)
	}

	/// Similarity if a feature of `diameter` were added
	pub fn similarity_with(&mut self, diameter: f32) -> f32 {
		self.add(diameter);
		let similarity = self.similarity();
		self.remove(diameter);
		similarity
	}
}

/// Target neighbour table: one row per size bin of the phase, 40 bins of
/// two neighbours each, whole table normalized to one.
/// `None` when the phase carries no neighbour statistics.
pub fn target_neighbor_distribution(stats: &PhaseStats) -> Option<Vec<Vec<f32>>> {
	if stats.neighbors.is_empty() {
		return None;
	}
	let rows = stats.size_bin_count();
	let min = stats.min_diameter();
	let mut table = Vec::with_capacity(rows);
	for row in 0..rows {
		let dist = stats.neighbors[row.min(stats.neighbors.len() - 1)];
		let (lo, hi) = if rows == 1 {
			(0.0, 1.0)
		} else {
			let lo_edge = min + row as f32 * stats.bin_step;
			let hi_edge = min + (row + 1) as f32 * stats.bin_step;
			(lognormal_cdf(stats.size, lo_edge), lognormal_cdf(stats.size, hi_edge))
		};
		let row_mass = (hi - lo).max(0.0);
		let mut values = Vec::with_capacity(DISTRIBUTION_BINS);
		let mut previous = 0.0;
		for bin in 0..DISTRIBUTION_BINS {
			let cdf = lognormal_cdf(dist, ((bin + 1) * NEIGHBOR_BIN_WIDTH) as f32);
			values.push(((cdf - previous) * row_mass) as f32);
			previous = cdf;
		}
		table.push(values);
	}
	let total: f32 = table.iter().flatten().sum();
	if total > 0.0 {
		for value in table.iter_mut().flatten() {
			*value /= total;
		}
	}
	Some(table)
}

/// Simulated neighbour table from (size bin, neighbour count) pairs, each
/// row normalized to a conditional distribution.
pub fn simulated_neighbor_distribution(rows: usize, samples: impl Iterator<Item = (usize, usize)>) -> Vec<Vec<f32>> {
	let rows = rows.max(1);
	let mut table = vec![vec![0.0f32; DISTRIBUTION_BINS]; rows];
	for (size_bin, neighbors) in samples {
		let bin = (neighbors / NEIGHBOR_BIN_WIDTH).min(DISTRIBUTION_BINS - 1);
		table[size_bin.min(rows - 1)][bin] += 1.0;
	}
	for row in table.iter_mut() {
		let total: f32 = row.iter().sum();
		if total > 0.0 {
			for value in row.iter_mut() {
				*value /= total;
			}
		}
	}
	table
}
