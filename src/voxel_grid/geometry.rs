use bitvec::vec::BitVec;
use serde::{Deserialize, Serialize};

use crate::packing::error::PackingError;
use crate::voxel_grid::grid::{FeatureGrid, MATRIX};

/// Serializable part of a domain description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
	pub dims: [usize; 3],
	#[serde(default = "unit_spacing")]
	pub spacing: [f32; 3],
	#[serde(default)]
	pub periodic: bool,
}

fn unit_spacing() -> [f32; 3] {
	[1.0; 3]
}

/// Voxel domain the microstructure is synthesized into.
#[derive(Debug, Clone)]
pub struct Domain {
	pub dims: [usize; 3],
	pub spacing: [f32; 3],
	pub periodic: bool,
	/// Voxels eligible to receive features; `None` means every voxel.
	pub mask: Option<BitVec>,
}

/// Coarse lattice used while packing (a multiple of the voxel spacing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lattice {
	pub dims: [usize; 3],
	pub spacing: [f32; 3],
	pub periodic: bool,
}

impl Lattice {
	pub fn total_cells(&self) -> usize {
		self.dims[0] * self.dims[1] * self.dims[2]
	}

	/// Cell containing a physical point (clamped into the lattice)
	pub fn cell_of(&self, point: [f32; 3]) -> [isize; 3] {
		let mut cell = [0isize; 3];
		for axis in 0..3 {
			let c = (point[axis] / self.spacing[axis]).floor() as isize;
			cell[axis] = if self.periodic {
				c.rem_euclid(self.dims[axis] as isize)
			} else {
				c.clamp(0, self.dims[axis] as isize - 1)
			};
		}
		cell
	}

	/// (i, j, k) of a linear cell index
	pub fn cell_coord(&self, index: usize) -> [isize; 3] {
		let i = index % self.dims[0];
		let j = (index / self.dims[0]) % self.dims[1];
		let k = index / (self.dims[0] * self.dims[1]);
		[i as isize, j as isize, k as isize]
	}

	/// Physical center of a cell given by its linear index
	pub fn cell_center(&self, index: usize) -> [f32; 3] {
		let [i, j, k] = self.cell_coord(index);
		[
			(i as f32 + 0.5) * self.spacing[0],
			(j as f32 + 0.5) * self.spacing[1],
			(k as f32 + 0.5) * self.spacing[2],
		]
	}

	/// Move a cell coordinate back onto the lattice (wrap or clamp)
	pub fn fold_coord(&self, coord: [isize; 3]) -> [isize; 3] {
		let mut out = coord;
		for axis in 0..3 {
			let n = self.dims[axis] as isize;
			out[axis] = if self.periodic { coord[axis].rem_euclid(n) } else { coord[axis].clamp(0, n - 1) };
		}
		out
	}

	pub fn coord_index(&self, coord: [isize; 3]) -> usize {
		let [i, j, k] = self.fold_coord(coord);
		i as usize + j as usize * self.dims[0] + k as usize * self.dims[0] * self.dims[1]
	}
}

impl Domain {
	/// Build and validate a domain.
	pub fn new(dims: [usize; 3], spacing: [f32; 3], periodic: bool) -> Result<Self, PackingError> {
		if dims.iter().any(|&d| d == 0) {
			return Err(PackingError::EmptyDomain);
		}
		if spacing.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
			return Err(PackingError::InvalidDomain(format!(
				"voxel spacing must be positive, got {:?}",
				spacing
			)));
		}
		Ok(Self { dims, spacing, periodic, mask: None })
	}

	pub fn from_config(config: &DomainConfig) -> Result<Self, PackingError> {
		Self::new(config.dims, config.spacing, config.periodic)
	}

	/// Restrict feature placement to the voxels set in `mask`.
	pub fn with_mask(mut self, mask: BitVec) -> Result<Self, PackingError> {
		if mask.len() != self.total_voxels() {
			return Err(PackingError::InvalidDomain(format!(
				"mask has {} entries but the domain has {} voxels",
				mask.len(),
				self.total_voxels()
			)));
		}
		self.mask = Some(mask);
		Ok(self)
	}

	pub fn total_voxels(&self) -> usize {
		self.dims[0] * self.dims[1] * self.dims[2]
	}

	pub fn voxel_volume(&self) -> f32 {
		self.spacing[0] * self.spacing[1] * self.spacing[2]
	}

	/// Physical extent along each axis
	pub fn size(&self) -> [f32; 3] {
		[
			self.dims[0] as f32 * self.spacing[0],
			self.dims[1] as f32 * self.spacing[1],
			self.dims[2] as f32 * self.spacing[2],
		]
	}

	pub fn diagonal(&self) -> f32 {
		let [x, y, z] = self.size();
		(x * x + y * y + z * z).sqrt()
	}

	#[inline]
	pub fn is_eligible(&self, index: usize) -> bool {
		self.mask.as_ref().is_none_or(|mask| mask[index])
	}

	/// Volume of the voxels that may receive features
	pub fn usable_volume(&self) -> f32 {
		let eligible = match &self.mask {
			Some(mask) => mask.count_ones(),
			None => self.total_voxels(),
		};
		eligible as f32 * self.voxel_volume()
	}

	/// Coarse packing lattice at `scale` times the voxel spacing.
	/// Axes thinner than `scale` voxels keep a single cell.
	pub fn packing_lattice(&self, scale: usize) -> Lattice {
		let scale = scale.max(1);
		let mut dims = [1usize; 3];
		let mut spacing = [0.0f32; 3];
		for axis in 0..3 {
			dims[axis] = (self.dims[axis] / scale).max(1);
			spacing[axis] = self.dims[axis] as f32 * self.spacing[axis] / dims[axis] as f32;
		}
		Lattice { dims, spacing, periodic: self.periodic }
	}

	/// Lattice at full voxel resolution
	pub fn voxel_lattice(&self) -> Lattice {
		Lattice { dims: self.dims, spacing: self.spacing, periodic: self.periodic }
	}

	/// Instantiate an output grid; masked-out voxels start as matrix.
	pub fn build_grid(&self) -> FeatureGrid {
		let mut grid = FeatureGrid::new(self.dims[0], self.dims[1], self.dims[2], self.spacing, self.periodic);
		if let Some(mask) = &self.mask {
			for (index, eligible) in mask.iter().enumerate() {
				if !*eligible {
					grid.feature_ids[index] = MATRIX;
				}
			}
		}
		grid
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bitvec::prelude::*;

	#[test]
	fn zero_dimension_is_empty_domain() {
		assert!(matches!(Domain::new([0, 4, 4], [1.0; 3], false), Err(PackingError::EmptyDomain)));
	}

	#[test]
	fn packing_lattice_halves_resolution() {
		let domain = Domain::new([10, 10, 5], [0.5, 0.5, 1.0], false).unwrap();
		let lattice = domain.packing_lattice(2);
		assert_eq!(lattice.dims, [5, 5, 2]);
		assert_eq!(lattice.spacing[0], 1.0);
		assert_eq!(lattice.spacing[2], 2.5);
	}

	#[test]
	fn mask_limits_usable_volume() {
		let mut mask = bitvec![1; 8];
		mask.set(0, false);
		mask.set(1, false);
		let domain = Domain::new([2, 2, 2], [1.0; 3], false).unwrap().with_mask(mask).unwrap();
		assert_eq!(domain.usable_volume(), 6.0);
		let grid = domain.build_grid();
		assert_eq!(grid.feature_ids[0], MATRIX);
		assert_eq!(grid.feature_ids[2], crate::voxel_grid::grid::UNASSIGNED);
	}

	#[test]
	fn cell_of_wraps_when_periodic() {
		let lattice = Lattice { dims: [4, 4, 4], spacing: [1.0; 3], periodic: true };
		assert_eq!(lattice.cell_of([-0.5, 4.5, 2.0]), [3, 0, 2]);
		let bounded = Lattice { periodic: false, ..lattice };
		assert_eq!(bounded.cell_of([-0.5, 4.5, 2.0]), [0, 3, 2]);
	}
}
