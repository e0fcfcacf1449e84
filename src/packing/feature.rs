use serde::{Deserialize, Serialize};

/// One synthetic grain or precipitate particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
	/// 1-based phase index (0 is the matrix)
	pub phase: usize,
	pub equivalent_diameter: f32,
	pub volume: f32,
	/// Axis lengths relative to the largest axis: [1, b/a, c/a]
	pub axis_ratios: [f32; 3],
	/// Bunge Euler angles (phi1, Phi, phi2) in radians
	pub euler: [f32; 3],
	/// Morphology factor of non-ellipsoidal shapes; 1.0 for ellipsoids
	pub omega3: f32,
	pub neighbor_count: usize,
	pub centroid: [f32; 3],
}

impl Feature {
	/// Volume of the sphere with the given equivalent diameter
	pub fn sphere_volume(diameter: f32) -> f32 {
		std::f32::consts::PI / 6.0 * diameter * diameter * diameter
	}
}
