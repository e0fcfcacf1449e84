pub mod voxel_grid {
	pub mod info;
	pub mod grid;
	pub mod geometry;
	pub mod utils;
	pub mod manip;
	pub mod raster;
	pub mod gap_fill;
	pub mod mrc_output;
}

pub mod packing {
	pub mod error;
	pub mod stats;
	pub mod config;
	pub mod feature;
	pub mod shape;
	pub mod orientation;
	pub mod sampler;
	pub mod histogram;
	pub mod packing_grid;
	pub mod spatial;
	pub mod optimizer;
	pub mod synthesis;
}
