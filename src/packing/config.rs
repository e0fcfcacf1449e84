use serde::{Deserialize, Serialize};

use crate::packing::stats::PhaseStats;
use crate::voxel_grid::geometry::DomainConfig;

/// Tuning knobs of the packing engine. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackingConfig {
	/// RNG seed; `None` seeds from the operating system
	pub seed: Option<u64>,
	/// Packing lattice spacing as a multiple of the voxel spacing
	pub packing_scale: usize,
	/// Radius factor applied while features are trial-placed
	pub exclusion_inflation: f32,
	pub iterations_per_feature: usize,
	pub precipitate_iterations_per_feature: usize,
	/// Largest nudge, in packing cells
	pub nudge_cells: f32,
	/// Share of the target volume accepted without the size-error test
	pub bootstrap_fraction: f32,
	/// Tolerance added per rejected candidate while generating
	pub size_tolerance_step: f32,
	/// Consecutive rejected moves that end refinement (0 disables)
	pub stall_window: usize,
	/// Gap-fill leftovers become matrix instead of staying unassigned
	pub residual_to_matrix: bool,
	/// Rasterization worker count; `None` uses the available parallelism
	pub threads: Option<usize>,
	pub show_progress: bool,
}

impl Default for PackingConfig {
	fn default() -> Self {
		Self {
			seed: None,
			packing_scale: 2,
			exclusion_inflation: 1.0,
			iterations_per_feature: 100,
			precipitate_iterations_per_feature: 10,
			nudge_cells: 2.0,
			bootstrap_fraction: 0.75,
			size_tolerance_step: 0.001,
			stall_window: 0,
			residual_to_matrix: true,
			threads: None,
			show_progress: true,
		}
	}
}

impl PackingConfig {
	/// Worker count for the parallel stages
	pub fn worker_threads(&self) -> usize {
		self.threads
			.filter(|&n| n > 0)
			.unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
	}
}

/// Complete description of one synthesis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
	pub domain: DomainConfig,
	pub phases: Vec<PhaseStats>,
	#[serde(default)]
	pub packing: PackingConfig,
}

impl SynthesisConfig {
	pub fn from_json(text: &str) -> serde_json::Result<Self> {
		serde_json::from_str(text)
	}

	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string_pretty(self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_packing_block_uses_defaults() {
		let json = r#"{
			"domain": { "dims": [8, 8, 8], "periodic": true },
			"phases": []
		}"#;
		let config = SynthesisConfig::from_json(json).unwrap();
		assert_eq!(config.packing, PackingConfig::default());
		assert_eq!(config.domain.spacing, [1.0; 3]);
		assert!(config.domain.periodic);
	}

	#[test]
	fn partial_packing_block_keeps_other_defaults() {
		let json = r#"{
			"domain": { "dims": [8, 8, 8] },
			"phases": [],
			"packing": { "seed": 7, "stall_window": 50 }
		}"#;
		let config = SynthesisConfig::from_json(json).unwrap();
		assert_eq!(config.packing.seed, Some(7));
		assert_eq!(config.packing.stall_window, 50);
		assert_eq!(config.packing.packing_scale, 2);
		assert!(config.packing.residual_to_matrix);
	}

	#[test]
	fn zero_threads_falls_back_to_available() {
		let config = PackingConfig { threads: Some(0), ..PackingConfig::default() };
		assert!(config.worker_threads() >= 1);
	}
}
