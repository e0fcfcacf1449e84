/// Voxel that no feature has claimed yet
pub const UNASSIGNED: i32 = -1;
/// Voxel claimed with equal score by two features during one assignment pass
pub const CONTESTED: i32 = -2;
/// Background / matrix label (also used for voxels outside the mask)
pub const MATRIX: i32 = 0;

/// 3D voxel grid holding one feature id per voxel
#[derive(Clone, Debug)]
pub struct FeatureGrid {
	pub len_i: usize,  // Number of voxels along I
	pub len_j: usize,  // Number of voxels along J
	pub len_k: usize,  // Number of voxels along K
	pub total_voxels: usize, // Total number of voxels IxJxK
	pub spacing: [f32; 3], // Voxel edge lengths in domain units
	pub periodic: bool,
	pub feature_ids: Vec<i32>, // 0 = matrix, >0 = feature, <0 = pending
	pub phases: Vec<i32>, // derived from feature_ids once assignment is final
}

impl FeatureGrid {
	/// Create a new grid with every voxel `UNASSIGNED`
	pub fn new(len_i: usize, len_j: usize, len_k: usize, spacing: [f32; 3], periodic: bool) -> Self {
		let total_voxels = len_i * len_j * len_k;

		Self {
			len_i,
			len_j,
			len_k,
			total_voxels,
			spacing,
			periodic,
			feature_ids: vec![UNASSIGNED; total_voxels],
			phases: vec![0; total_voxels],
		}
	}

	/// Physical extent of the grid along each axis
	pub fn size(&self) -> [f32; 3] {
		[
			self.len_i as f32 * self.spacing[0],
			self.len_j as f32 * self.spacing[1],
			self.len_k as f32 * self.spacing[2],
		]
	}
}
