use std::f32::consts::PI;

use glam::{Mat3, Vec3};
use statrs::function::gamma::gamma;

use crate::packing::error::PackingError;
use crate::packing::feature::Feature;
use crate::voxel_grid::geometry::Lattice;
use crate::voxel_grid::utils::resolve_index;

/// Closed set of feature shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeClass {
	Ellipsoid,
	SuperEllipsoid,
	Cuboid,
	Cylinder,
}

impl TryFrom<u32> for ShapeClass {
	type Error = PackingError;

	fn try_from(code: u32) -> Result<Self, Self::Error> {
		match code {
			0 => Ok(ShapeClass::Ellipsoid),
			1 => Ok(ShapeClass::SuperEllipsoid),
			2 => Ok(ShapeClass::Cuboid),
			3 => Ok(ShapeClass::Cylinder),
			other => Err(PackingError::InvalidShapeClass(other)),
		}
	}
}

/// Superellipsoid exponent for a morphology factor
pub fn superellipsoid_exponent(omega3: f32) -> f32 {
	2.0 / omega3.max(0.2)
}

impl ShapeClass {
	/// Largest principal radius `a` of a shape with volume `volume` and
	/// axis ratios `[1, b, c]`.
	pub fn principal_radius(&self, volume: f32, ratios: [f32; 3], omega3: f32) -> f32 {
		let bc = ratios[1] * ratios[2];
		let cubed = match self {
			ShapeClass::Ellipsoid => 3.0 * volume / (4.0 * PI * bc),
			ShapeClass::SuperEllipsoid => {
				let n = superellipsoid_exponent(omega3) as f64;
				let unit = 8.0 * gamma(1.0 + 1.0 / n).powi(3) / gamma(1.0 + 3.0 / n);
				volume / (unit as f32 * bc)
			}
			ShapeClass::Cuboid => volume / (8.0 * bc),
			ShapeClass::Cylinder => volume / (2.0 * PI * bc),
		};
		cubed.cbrt()
	}

	/// Signed membership of a point given in normalized principal-axis units.
	/// Non-negative values are inside the shape.
	#[inline]
	pub fn membership(&self, p: Vec3, exponent: f32) -> f32 {
		match self {
			ShapeClass::Ellipsoid => 1.0 - p.length_squared(),
			ShapeClass::SuperEllipsoid => {
				let a = p.abs();
				1.0 - (a.x.powf(exponent) + a.y.powf(exponent) + a.z.powf(exponent))
			}
			ShapeClass::Cuboid => 1.0 - p.abs().max_element(),
			ShapeClass::Cylinder => {
				let radial = 1.0 - (p.y * p.y + p.z * p.z);
				let axial = 1.0 - p.x.abs();
				radial.min(axial)
			}
		}
	}
}

/// Bunge (ZXZ) orientation matrix taking feature-frame vectors to the sample frame
pub fn orientation_matrix(euler: [f32; 3]) -> Mat3 {
	Mat3::from_rotation_z(euler[0]) * Mat3::from_rotation_x(euler[1]) * Mat3::from_rotation_z(euler[2])
}

/// Geometry of a placed feature, ready for membership tests.
#[derive(Debug, Clone, Copy)]
pub struct FeatureShape {
	pub class: ShapeClass,
	pub radii: [f32; 3],
	pub exponent: f32,
	world_to_local: Mat3,
}

impl FeatureShape {
	pub fn new(class: ShapeClass, feature: &Feature) -> Self {
		let a = class.principal_radius(feature.volume, feature.axis_ratios, feature.omega3);
		Self {
			class,
			radii: [a, a * feature.axis_ratios[1], a * feature.axis_ratios[2]],
			exponent: superellipsoid_exponent(feature.omega3),
			world_to_local: orientation_matrix(feature.euler).transpose(),
		}
	}

	/// Same shape with every radius multiplied by `factor`
	pub fn inflated(&self, factor: f32) -> Self {
		let mut out = *self;
		for r in out.radii.iter_mut() {
			*r *= factor;
		}
		out
	}

	pub fn max_radius(&self) -> f32 {
		self.radii[0].max(self.radii[1]).max(self.radii[2])
	}

	/// Membership of a point given relative to the centroid
	#[inline]
	pub fn membership_at(&self, offset: Vec3) -> f32 {
		let local = self.world_to_local * offset;
		let normalized = Vec3::new(local.x / self.radii[0], local.y / self.radii[1], local.z / self.radii[2]);
		self.class.membership(normalized, self.exponent)
	}

	/// Visit every lattice cell inside the shape centered at `centroid`.
	/// Coordinates are unwrapped; the centroid's own cell is always visited.
	fn scan(&self, centroid: [f32; 3], lattice: &Lattice, mut visit: impl FnMut([isize; 3], f32)) {
		let c = Vec3::from(centroid);
		let mut center = [0isize; 3];
		let mut lo = [0isize; 3];
		let mut hi = [0isize; 3];
		for axis in 0..3 {
			let s = lattice.spacing[axis];
			let n = lattice.dims[axis] as isize;
			center[axis] = (centroid[axis] / s).floor() as isize;
			let half = (self.max_radius() / s).ceil() as isize + 1;
			if lattice.periodic && 2 * half + 1 > n {
				// one image per cell
				lo[axis] = center[axis] - n / 2;
				hi[axis] = lo[axis] + n - 1;
			} else {
				lo[axis] = center[axis] - half;
				hi[axis] = center[axis] + half;
			}
		}

		let mut center_seen = false;
		for k in lo[2]..=hi[2] {
			let z = (k as f32 + 0.5) * lattice.spacing[2] - c.z;
			for j in lo[1]..=hi[1] {
				let y = (j as f32 + 0.5) * lattice.spacing[1] - c.y;
				for i in lo[0]..=hi[0] {
					let x = (i as f32 + 0.5) * lattice.spacing[0] - c.x;
					let score = self.membership_at(Vec3::new(x, y, z));
					let is_center = [i, j, k] == center;
					if score >= 0.0 || is_center {
						center_seen |= is_center;
						visit([i, j, k], score.max(0.0));
					}
				}
			}
		}
		if !center_seen {
			visit(center, 0.0);
		}
	}

	/// Cells of `lattice` whose centers fall inside the shape, with their
	/// membership scores. Periodic lattices wrap, bounded ones drop cells.
	pub fn rasterize(&self, centroid: [f32; 3], lattice: &Lattice) -> Vec<CellHit> {
		let mut hits = Vec::new();
		self.scan(centroid, lattice, |coord, score| {
			if let Some(index) = resolve_index(lattice.dims, lattice.periodic, coord) {
				hits.push(CellHit { index, score });
			}
		});
		hits
	}

	/// Offsets of the covered cells relative to the centroid cell, for a
	/// centroid sitting at a cell center.
	pub fn footprint(&self, lattice: &Lattice) -> Footprint {
		let origin = [0.5 * lattice.spacing[0], 0.5 * lattice.spacing[1], 0.5 * lattice.spacing[2]];
		let mut offsets = Vec::new();
		self.scan(origin, lattice, |coord, _| offsets.push(coord));
		Footprint { offsets }
	}
}

/// A lattice cell claimed by a feature
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellHit {
	pub index: usize,
	pub score: f32,
}

/// Precomputed cell offsets of one feature's shape.
#[derive(Debug, Clone, Default)]
pub struct Footprint {
	pub offsets: Vec<[isize; 3]>,
}

impl Footprint {
	/// Linear indices covered when the centroid sits in cell `center`
	pub fn cells_at(&self, center: [isize; 3], lattice: &Lattice) -> Vec<usize> {
		let mut cells: Vec<usize> = self
			.offsets
			.iter()
			.filter_map(|o| {
				resolve_index(
					lattice.dims,
					lattice.periodic,
					[center[0] + o[0], center[1] + o[1], center[2] + o[2]],
				)
			})
			.collect();
		if lattice.periodic {
			cells.sort_unstable();
			cells.dedup();
		}
		cells
	}

	pub fn len(&self) -> usize {
		self.offsets.len()
	}

	pub fn is_empty(&self) -> bool {
		self.offsets.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_relative_eq;

	fn sphere(diameter: f32, class: ShapeClass) -> (Feature, FeatureShape) {
		let feature = Feature {
			phase: 1,
			equivalent_diameter: diameter,
			volume: Feature::sphere_volume(diameter),
			axis_ratios: [1.0, 1.0, 1.0],
			euler: [0.0; 3],
			omega3: 1.0,
			neighbor_count: 0,
			centroid: [0.0; 3],
		};
		let shape = FeatureShape::new(class, &feature);
		(feature, shape)
	}

	#[test]
	fn unknown_shape_code_is_rejected() {
		assert_eq!(ShapeClass::try_from(4), Err(PackingError::InvalidShapeClass(4)));
		assert_eq!(ShapeClass::try_from(3), Ok(ShapeClass::Cylinder));
	}

	#[test]
	fn superellipsoid_with_exponent_two_matches_ellipsoid() {
		let ratios = [1.0, 0.8, 0.6];
		let a = ShapeClass::Ellipsoid.principal_radius(10.0, ratios, 1.0);
		let b = ShapeClass::SuperEllipsoid.principal_radius(10.0, ratios, 1.0);
		assert_relative_eq!(a, b, epsilon = 1e-4);
	}

	#[test]
	fn sphere_radius_is_half_diameter() {
		let (_, shape) = sphere(4.0, ShapeClass::Ellipsoid);
		assert_relative_eq!(shape.radii[0], 2.0, epsilon = 1e-4);
	}

	#[test]
	fn membership_signs() {
		let p = Vec3::new(0.5, 0.0, 0.0);
		let q = Vec3::new(1.1, 0.0, 0.0);
		for class in [ShapeClass::Ellipsoid, ShapeClass::SuperEllipsoid, ShapeClass::Cuboid, ShapeClass::Cylinder] {
			assert!(class.membership(p, 2.0) > 0.0);
			assert!(class.membership(q, 2.0) < 0.0);
		}
		// corner of the unit cube is inside the cuboid only
		let corner = Vec3::splat(0.9);
		assert!(ShapeClass::Cuboid.membership(corner, 2.0) >= 0.0);
		assert!(ShapeClass::Ellipsoid.membership(corner, 2.0) < 0.0);
	}

	#[test]
	fn rotation_moves_long_axis() {
		let feature = Feature {
			phase: 1,
			equivalent_diameter: 2.0,
			volume: 4.0,
			axis_ratios: [1.0, 0.25, 0.25],
			euler: [std::f32::consts::FRAC_PI_2, 0.0, 0.0],
			omega3: 1.0,
			neighbor_count: 0,
			centroid: [0.0; 3],
		};
		let shape = FeatureShape::new(ShapeClass::Ellipsoid, &feature);
		let a = shape.radii[0];
		assert!(shape.membership_at(Vec3::new(0.0, 0.9 * a, 0.0)) > 0.0);
		assert!(shape.membership_at(Vec3::new(0.9 * a, 0.0, 0.0)) < 0.0);
	}

	#[test]
	fn centroid_cell_is_always_covered() {
		let lattice = Lattice { dims: [10, 10, 10], spacing: [1.0; 3], periodic: false };
		// far smaller than a cell
		let (_, shape) = sphere(0.1, ShapeClass::Cuboid);
		let hits = shape.rasterize([3.9, 4.1, 5.7], &lattice);
		let center = 3 + 4 * 10 + 5 * 100;
		let hit = hits.iter().find(|h| h.index == center).unwrap();
		assert!(hit.score >= 0.0);
	}

	#[test]
	fn bounded_lattice_drops_cells_and_periodic_wraps() {
		let (_, shape) = sphere(4.0, ShapeClass::Ellipsoid);
		let bounded = Lattice { dims: [10, 10, 10], spacing: [1.0; 3], periodic: false };
		let periodic = Lattice { periodic: true, ..bounded };
		let inner = shape.rasterize([5.0, 5.0, 5.0], &bounded).len();
		let clipped = shape.rasterize([0.5, 5.0, 5.0], &bounded).len();
		let wrapped = shape.rasterize([0.5, 5.0, 5.0], &periodic).len();
		assert!(clipped < inner);
		assert_eq!(wrapped, shape.rasterize([5.5, 5.0, 5.0], &periodic).len());
		assert!(shape.rasterize([0.5, 5.0, 5.0], &periodic).iter().any(|h| h.index % 10 == 9));
	}

	#[test]
	fn oversized_shape_on_small_periodic_lattice_has_no_duplicates() {
		let (_, shape) = sphere(20.0, ShapeClass::Ellipsoid);
		let lattice = Lattice { dims: [4, 4, 4], spacing: [1.0; 3], periodic: true };
		let mut cells: Vec<usize> = shape.rasterize([2.0, 2.0, 2.0], &lattice).iter().map(|h| h.index).collect();
		assert_eq!(cells.len(), 64);
		cells.sort_unstable();
		cells.dedup();
		assert_eq!(cells.len(), 64);
	}

	#[test]
	fn footprint_matches_rasterization_at_cell_center() {
		let (_, shape) = sphere(3.0, ShapeClass::Ellipsoid);
		let lattice = Lattice { dims: [12, 12, 12], spacing: [1.0; 3], periodic: false };
		let footprint = shape.footprint(&lattice);
		let mut from_footprint = footprint.cells_at([6, 6, 6], &lattice);
		let mut direct: Vec<usize> = shape.rasterize([6.5, 6.5, 6.5], &lattice).iter().map(|h| h.index).collect();
		from_footprint.sort_unstable();
		direct.sort_unstable();
		assert_eq!(from_footprint, direct);
	}
}
