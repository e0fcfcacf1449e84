use serde::{Deserialize, Serialize};

use crate::packing::error::PackingError;

/// Statistical role a phase plays in the synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseRole {
	Primary,
	Precipitate,
}

/// Log-normal parameters (mean and standard deviation of ln x)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogNormal {
	pub mu: f32,
	pub sigma: f32,
}

/// Beta distribution parameters; non-positive values mark a degenerate bin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaParams {
	pub alpha: f32,
	pub beta: f32,
}

impl BetaParams {
	pub fn is_usable(&self) -> bool {
		self.alpha > 0.0 && self.beta > 0.0 && self.alpha.is_finite() && self.beta.is_finite()
	}
}

/// Target radial distribution of precipitate centroid distances.
/// `frequencies.len()` is the bin count over `[min_distance, max_distance]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RdfTarget {
	pub min_distance: f32,
	pub max_distance: f32,
	pub frequencies: Vec<f32>,
}

impl RdfTarget {
	pub fn bin_count(&self) -> usize {
		self.frequencies.len()
	}

	pub fn step(&self) -> f32 {
		(self.max_distance - self.min_distance) / self.bin_count().max(1) as f32
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecipitateStats {
	/// Probability that a precipitate is seeded on a primary boundary voxel
	#[serde(default)]
	pub boundary_fraction: f32,
	#[serde(default)]
	pub rdf: Option<RdfTarget>,
}

fn default_cutoff() -> f32 {
	5.0
}

/// Read-only statistics bundle describing one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
	#[serde(default)]
	pub name: Option<String>,
	pub role: PhaseRole,
	pub phase_fraction: f32,
	/// Raw shape class code, checked when the phase is synthesized
	#[serde(default)]
	pub shape_type: u32,
	/// Log-normal of the equivalent sphere diameter
	pub size: LogNormal,
	/// Diameter bounds, in standard deviations of ln d around `mu`
	#[serde(default = "default_cutoff")]
	pub min_cutoff: f32,
	#[serde(default = "default_cutoff")]
	pub max_cutoff: f32,
	pub bin_step: f32,
	/// Per size bin tables
	pub b_over_a: Vec<BetaParams>,
	pub c_over_a: Vec<BetaParams>,
	#[serde(default)]
	pub omega3: Vec<BetaParams>,
	#[serde(default)]
	pub neighbors: Vec<LogNormal>,
	/// Axis orientation weights; empty means uniform
	#[serde(default)]
	pub axis_odf: Vec<f32>,
	#[serde(default)]
	pub precipitate: Option<PrecipitateStats>,
}

impl PhaseStats {
	/// Equiaxed phase with a single size bin and near-spherical axis ratios.
	pub fn equiaxed(role: PhaseRole, phase_fraction: f32, mu: f32, sigma: f32) -> Self {
		let ratios = vec![BetaParams { alpha: 15.0, beta: 1.5 }];
		// One bin spanning the whole diameter range
		let bin_step = (mu + default_cutoff() * sigma).exp();
		Self {
			name: None,
			role,
			phase_fraction,
			shape_type: 0,
			size: LogNormal { mu, sigma },
			min_cutoff: default_cutoff(),
			max_cutoff: default_cutoff(),
			bin_step,
			b_over_a: ratios.clone(),
			c_over_a: ratios,
			omega3: vec![BetaParams { alpha: 10.0, beta: 1.5 }],
			neighbors: vec![LogNormal { mu: 2.3, sigma: 0.4 }],
			axis_odf: Vec::new(),
			precipitate: match role {
				PhaseRole::Primary => None,
				PhaseRole::Precipitate => Some(PrecipitateStats { boundary_fraction: 0.0, rdf: None }),
			},
		}
	}

	pub fn min_diameter(&self) -> f32 {
		(self.size.mu - self.min_cutoff * self.size.sigma).exp()
	}

	pub fn max_diameter(&self) -> f32 {
		(self.size.mu + self.max_cutoff * self.size.sigma).exp()
	}

	/// Number of size bins the per-bin tables are indexed by
	pub fn size_bin_count(&self) -> usize {
		let span = self.max_diameter() - self.min_diameter();
		if !(self.bin_step > 0.0) || span <= 0.0 {
			return 1;
		}
		(span / self.bin_step).floor() as usize + 1
	}

	/// Size bin of a diameter, clamped to the table bounds
	pub fn size_bin(&self, diameter: f32) -> usize {
		let bins = self.size_bin_count();
		if bins == 1 {
			return 0;
		}
		let raw = ((diameter - self.min_diameter()) / self.bin_step).floor();
		(raw.max(0.0) as usize).min(bins - 1)
	}

	pub fn boundary_fraction(&self) -> f32 {
		self.precipitate.as_ref().map_or(0.0, |p| p.boundary_fraction)
	}

	pub fn rdf(&self) -> Option<&RdfTarget> {
		self.precipitate.as_ref().and_then(|p| p.rdf.as_ref())
	}

	pub fn label(&self, index: usize) -> String {
		match &self.name {
			Some(name) => format!("{} ({})", name, index),
			None => format!("phase {}", index),
		}
	}

	/// Check the bundle for values the engine cannot work with.
	pub fn validate(&self, phase: usize) -> Result<(), PackingError> {
		let invalid = |reason: &str| PackingError::InvalidStats { phase, reason: reason.to_string() };
		if !(self.phase_fraction >= 0.0) {
			return Err(invalid("phase fraction must be non-negative"));
		}
		if !self.size.mu.is_finite() || !(self.size.sigma >= 0.0) {
			return Err(invalid("size distribution needs finite mu and sigma >= 0"));
		}
		if !(self.min_cutoff >= 0.0) || !(self.max_cutoff >= 0.0) {
			return Err(invalid("diameter cutoffs must be non-negative"));
		}
		if !(self.max_diameter() > self.min_diameter()) {
			return Err(invalid("diameter range is empty"));
		}
		if !(self.bin_step > 0.0) {
			return Err(invalid("bin step must be positive"));
		}
		if self.b_over_a.is_empty() || self.c_over_a.is_empty() {
			return Err(invalid("axis ratio tables are empty"));
		}
		if self.axis_odf.iter().any(|w| !(*w >= 0.0)) {
			return Err(invalid("axis ODF weights must be non-negative"));
		}
		match (self.role, &self.precipitate) {
			(PhaseRole::Precipitate, None) => {
				return Err(invalid("precipitate phase is missing its precipitate block"));
			}
			(_, Some(p)) => {
				if !(0.0..=1.0).contains(&p.boundary_fraction) {
					return Err(invalid("boundary fraction must lie in [0, 1]"));
				}
				if let Some(rdf) = &p.rdf {
					if rdf.frequencies.is_empty() || !(rdf.max_distance > rdf.min_distance) || rdf.min_distance < 0.0 {
						return Err(invalid("RDF target needs bins and 0 <= min < max"));
					}
				}
			}
			_ => {}
		}
		Ok(())
	}
}
