use std::fs::File;
use std::io::{BufWriter, Result, Write};
use std::path::Path;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};

use crate::voxel_grid::grid;

/// Size of the fixed MRC header in bytes
pub const MRC_HEADER_BYTES: usize = 1024;
/// MRC data mode for 32-bit floats
pub const MODE_FLOAT32: i32 = 2;

/// MRC Header Struct
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MRCHeader {
	pub len_i: i32, pub len_j: i32, pub len_k: i32,  // Grid dimensions
	pub mode: i32,                  // Data mode (2: float32)
	pub istart: i32, pub jstart: i32, pub kstart: i32,  // Start positions
	pub m_i: i32, pub m_j: i32, pub m_k: i32,  // Grid size
	pub x_length: f32, pub y_length: f32, pub z_length: f32,  // Physical size
	pub alpha: f32, pub beta: f32, pub gamma: f32,  // Angles
	pub mapc: i32, pub mapr: i32, pub maps: i32,  // Axis mapping
	pub amin: f32, pub amax: f32, pub amean: f32,  // Data range
	pub ispg: i32, pub nsymbt: i32,  // Symmetry
	pub extra: [i32; 25],  // User space
	pub xorigin: f32, pub yorigin: f32, pub zorigin: f32,  // Origin
	pub map: i32, pub mach: i32, pub rms: f32, pub nlabl: i32,  // Metadata
	pub label: [[u8; 80]; 10],  // Labels
}

const _: () = assert!(std::mem::size_of::<MRCHeader>() == MRC_HEADER_BYTES);

impl MRCHeader {
	/// Create a header for a float32 volume with the given statistics
	pub fn new(dims: [usize; 3], size: [f32; 3], stats: [f32; 4], label: &str) -> Self {
		let [amin, amax, amean, rms] = stats;
		let mut header = MRCHeader::zeroed();
		header.len_i = dims[0] as i32;
		header.len_j = dims[1] as i32;
		header.len_k = dims[2] as i32;
		header.mode = MODE_FLOAT32;
		header.m_i = dims[0] as i32;
		header.m_j = dims[1] as i32;
		header.m_k = dims[2] as i32;
		header.x_length = size[0];
		header.y_length = size[1];
		header.z_length = size[2];
		header.alpha = 90.0;
		header.beta = 90.0;
		header.gamma = 90.0;
		header.mapc = 1;
		header.mapr = 2;
		header.maps = 3;
		header.amin = amin;
		header.amax = amax;
		header.amean = amean;
		header.rms = rms;
		header.ispg = 1;
		header.map = 542130509; // "MAP " ASCII identifier
		header.mach = i32::from_le_bytes([0x44, 0x44, 0x00, 0x00]); // little-endian stamp
		if !label.is_empty() {
			let bytes = label.as_bytes();
			let len = bytes.len().min(80);
			header.label[0][..len].copy_from_slice(&bytes[..len]);
			header.nlabl = 1;
		}
		header
	}

	/// Parse a header from the first 1024 bytes of an MRC file
	pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
		bytes.get(..MRC_HEADER_BYTES).and_then(|b| bytemuck::try_pod_read_unaligned(b).ok())
	}

	/// Write the header to an MRC file
	pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
		writer.write_all(bytemuck::bytes_of(self))
	}
}

/// min, max, mean, rms of a volume
fn volume_stats(values: &[f32]) -> [f32; 4] {
	if values.is_empty() {
		return [0.0; 4];
	}
	let mut min = f32::INFINITY;
	let mut max = f32::NEG_INFINITY;
	let mut sum = 0.0f64;
	for &v in values {
		min = min.min(v);
		max = max.max(v);
		sum += v as f64;
	}
	let mean = sum / values.len() as f64;
	let var = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / values.len() as f64;
	[min, max, mean as f32, var.sqrt() as f32]
}

fn write_volume(path: &Path, dims: [usize; 3], size: [f32; 3], labels: &[i32], label: &str) -> Result<()> {
	let start_time = Instant::now();
	let values: Vec<f32> = labels.iter().map(|&id| id as f32).collect();
	let header = MRCHeader::new(dims, size, volume_stats(&values), label);

	let mut writer = BufWriter::new(File::create(path)?);
	header.write_to(&mut writer)?;
	for value in &values {
		writer.write_all(&value.to_le_bytes())?;
	}
	writer.flush()?;

	log::info!("MRC file saved: {}", path.display());
	log::debug!("Save Time: {:.3} seconds", start_time.elapsed().as_secs_f64());
	Ok(())
}

impl grid::FeatureGrid {
	/// Save the feature-id volume as a float32 MRC file
	pub fn write_feature_mrc(&self, path: &Path) -> Result<()> {
		write_volume(path, self.dims(), self.size(), &self.feature_ids, "microgen feature ids")
	}

	/// Save the phase-id volume as a float32 MRC file
	pub fn write_phase_mrc(&self, path: &Path) -> Result<()> {
		write_volume(path, self.dims(), self.size(), &self.phases, "microgen phase ids")
	}
}
