use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::packing::config::{PackingConfig, SynthesisConfig};
use crate::packing::error::PackingError;
use crate::packing::feature::Feature;
use crate::packing::histogram::{bhattacharyya_3d, simulated_neighbor_distribution, target_neighbor_distribution};
use crate::packing::optimizer::{CancelToken, PhaseOptimizer, PhaseOutcome, PhaseReport, PhaseRun};
use crate::packing::orientation::{OrientationSampler, OrthorhombicAxisSampler};
use crate::packing::packing_grid::PackingGrid;
use crate::packing::shape::{FeatureShape, ShapeClass};
use crate::packing::stats::{PhaseRole, PhaseStats};
use crate::voxel_grid::gap_fill::GapFillReport;
use crate::voxel_grid::geometry::Domain;
use crate::voxel_grid::grid::FeatureGrid;
use crate::voxel_grid::manip::FragmentReport;
use crate::voxel_grid::raster::AssignmentStats;

/// Run-level diagnostics, serialized by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisReport {
	pub seed: u64,
	pub phases: Vec<PhaseReport>,
	pub primary_assignment: AssignmentStats,
	pub primary_gap_fill: GapFillReport,
	pub precipitate_assignment: Option<AssignmentStats>,
	pub precipitate_gap_fill: Option<GapFillReport>,
	pub fragments: FragmentReport,
	/// Gap fill over the voxels released by fragment cleanup
	pub cleanup_gap_fill: GapFillReport,
	/// Feature count per phase index (index 0 is the matrix)
	pub features_per_phase: Vec<usize>,
	/// Voxel count per phase index
	pub voxels_per_phase: Vec<usize>,
	pub removed_features: usize,
	/// Neighbour-distribution similarity over all primary phases
	pub neighborhood_similarity: Option<f32>,
}

/// Everything a run hands back to the caller.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
	pub grid: FeatureGrid,
	pub features: Vec<Feature>,
	pub report: SynthesisReport,
}

/// Normalized fractions of the phases with `role`, keyed by phase index
fn role_fractions(phases: &[PhaseStats], role: PhaseRole) -> Vec<(usize, f32)> {
	let members: Vec<(usize, f32)> = phases
		.iter()
		.enumerate()
		.filter(|(_, stats)| stats.role == role)
		.map(|(i, stats)| (i + 1, stats.phase_fraction))
		.collect();
	let total: f32 = members.iter().map(|(_, f)| f).sum();
	if total <= 0.0 {
		return members.into_iter().map(|(i, _)| (i, 0.0)).collect();
	}
	members.into_iter().map(|(i, f)| (i, f / total)).collect()
}

fn shapes_for(features: &[Feature], phases: &[PhaseStats]) -> Vec<(FeatureShape, [f32; 3])> {
	features
		.iter()
		.map(|f| {
			// phases that reach assignment have already passed the shape check
			let class = ShapeClass::try_from(phases[f.phase - 1].shape_type).unwrap_or(ShapeClass::Ellipsoid);
			(FeatureShape::new(class, f), f.centroid)
		})
		.collect()
}

/// Drives one complete synthesis: primary phases, voxel assignment, gap
/// fill, then precipitate phases on top of the primary structure.
pub struct Synthesizer<'a> {
	domain: &'a Domain,
	phases: &'a [PhaseStats],
	config: &'a PackingConfig,
	cancel: CancelToken,
	orientation: Box<dyn OrientationSampler + 'a>,
}

impl<'a> Synthesizer<'a> {
	pub fn new(domain: &'a Domain, phases: &'a [PhaseStats], config: &'a PackingConfig) -> Self {
		Self {
			domain,
			phases,
			config,
			cancel: CancelToken::new(),
			orientation: Box::new(OrthorhombicAxisSampler::default()),
		}
	}

	/// Use a custom orientation collaborator
	pub fn with_orientation(mut self, orientation: Box<dyn OrientationSampler + 'a>) -> Self {
		self.orientation = orientation;
		self
	}

	pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
		self.cancel = cancel;
		self
	}

	pub fn cancel_token(&self) -> CancelToken {
		self.cancel.clone()
	}

	fn optimizer(&self, phase: usize) -> PhaseOptimizer<'_> {
		PhaseOptimizer::new(phase, &self.phases[phase - 1], self.config, self.domain, &self.cancel, self.orientation.as_ref())
	}

	/// Validate a phase; invalid ones are reported as aborted and skipped
	fn checked(&self, phase: usize, reports: &mut Vec<PhaseReport>) -> bool {
		let stats = &self.phases[phase - 1];
		if let Err(e) = stats.validate(phase).and_then(|_| ShapeClass::try_from(stats.shape_type).map(|_| ())) {
			log::warn!("Skipping {}: {}", stats.label(phase), e);
			reports.push(PhaseReport::aborted(phase, stats.role, &e));
			return false;
		}
		if self.cancel.is_cancelled() {
			reports.push(PhaseReport::unplaced(phase, stats.role, PhaseOutcome::Cancelled));
			return false;
		}
		true
	}

	fn collect(run: PhaseRun, features: &mut Vec<Feature>, reports: &mut Vec<PhaseReport>) {
		features.extend(run.features);
		reports.push(run.report);
	}

	pub fn run(&self) -> Result<SynthesisOutput, PackingError> {
		let usable = self.domain.usable_volume();
		if !(usable > 0.0) {
			return Err(PackingError::EmptyDomain);
		}
		let seed = self.config.seed.unwrap_or_else(|| rand::rng().random());
		let mut rng = StdRng::seed_from_u64(seed);
		log::info!(
			"Synthesizing {} phases into {}x{}x{} voxels (seed {})",
			self.phases.len(),
			self.domain.dims[0],
			self.domain.dims[1],
			self.domain.dims[2],
			seed
		);

		let mut reports = Vec::new();
		let mut features: Vec<Feature> = Vec::new();
		let threads = self.config.worker_threads();

		let mut primary_grid = PackingGrid::new(self.domain.packing_lattice(self.config.packing_scale));
		for (phase, fraction) in role_fractions(self.phases, PhaseRole::Primary) {
			if !self.checked(phase, &mut reports) {
				continue;
			}
			let run = self.optimizer(phase).run_primary(&mut primary_grid, features.len(), usable * fraction, &mut rng);
			Self::collect(run, &mut features, &mut reports);
		}

		let mut grid = self.domain.build_grid();
		let primary_count = features.len();
		let primary_assignment = grid.assign_features(
			&shapes_for(&features, self.phases),
			1,
			self.domain,
			threads,
			self.config.show_progress,
		);
		let primary_gap_fill = grid.fill_gaps(self.config.residual_to_matrix);

		let precipitate_phases = role_fractions(self.phases, PhaseRole::Precipitate);
		let precipitate_total: f32 = precipitate_phases
			.iter()
			.map(|(phase, _)| self.phases[phase - 1].phase_fraction.max(0.0))
			.sum();
		let mut precipitate_assignment = None;
		let mut precipitate_gap_fill = None;
		if !precipitate_phases.is_empty() {
			let sites = grid.precipitate_sites(self.domain);
			let mut precipitate_grid = PackingGrid::new(self.domain.packing_lattice(self.config.packing_scale));
			for (phase, fraction) in precipitate_phases {
				if !self.checked(phase, &mut reports) {
					continue;
				}
				let target = usable * precipitate_total * fraction;
				let offset = features.len() - primary_count;
				let run = self.optimizer(phase).run_precipitate(&mut precipitate_grid, offset, &sites, target, &mut rng);
				Self::collect(run, &mut features, &mut reports);
			}
			precipitate_assignment = Some(grid.assign_features(
				&shapes_for(&features[primary_count..], self.phases),
				primary_count as i32 + 1,
				self.domain,
				threads,
				self.config.show_progress,
			));
			precipitate_gap_fill = Some(grid.fill_gaps(self.config.residual_to_matrix));
		}

		let fragments = grid.remove_fragments(&self.minimum_voxels(&features));
		let cleanup_gap_fill = grid.fill_gaps(self.config.residual_to_matrix);
		let removed_features = grid.compact_feature_ids(&mut features);
		grid.derive_phases(&features);
		let mut features_per_phase = vec![0usize; self.phases.len() + 1];
		for feature in &features {
			features_per_phase[feature.phase] += 1;
		}
		let voxels_per_phase = grid.phase_voxel_counts(self.phases.len());
		for (phase, count) in features_per_phase.iter().enumerate().skip(1) {
			log::info!(
				"{}: {} features, {} voxels",
				self.phases[phase - 1].label(phase),
				count,
				voxels_per_phase[phase]
			);
		}
		grid.report_memory();

		let report = SynthesisReport {
			seed,
			phases: reports,
			primary_assignment,
			primary_gap_fill,
			precipitate_assignment,
			precipitate_gap_fill,
			fragments,
			cleanup_gap_fill,
			features_per_phase,
			voxels_per_phase,
			removed_features,
			neighborhood_similarity: self.neighborhood_similarity(&features),
		};
		Ok(SynthesisOutput { grid, features, report })
	}

	/// Voxel count below which an interior precipitate piece is dropped:
	/// the volume of the phase's smallest allowed diameter. Primary features
	/// have no minimum.
	fn minimum_voxels(&self, features: &[Feature]) -> Vec<usize> {
		let voxel = self.domain.voxel_volume();
		features
			.iter()
			.map(|f| {
				let stats = &self.phases[f.phase - 1];
				match stats.role {
					PhaseRole::Primary => 0,
					PhaseRole::Precipitate => (Feature::sphere_volume(stats.min_diameter()) / voxel).floor() as usize,
				}
			})
			.collect()
	}

	/// Final neighbour-distribution similarity across the primary phases
	fn neighborhood_similarity(&self, features: &[Feature]) -> Option<f32> {
		let mut simulated = Vec::new();
		let mut targets = Vec::new();
		for (index, stats) in self.phases.iter().enumerate() {
			if stats.role != PhaseRole::Primary {
				continue;
			}
			let Some(target) = target_neighbor_distribution(stats) else {
				continue;
			};
			let phase = index + 1;
			let samples = features
				.iter()
				.filter(|f| f.phase == phase)
				.map(|f| (stats.size_bin(f.equivalent_diameter), f.neighbor_count));
			simulated.push(simulated_neighbor_distribution(target.len(), samples));
			targets.push(target);
		}
		if targets.is_empty() {
			return None;
		}
		Some(bhattacharyya_3d(&simulated, &targets))
	}
}

/// Build the domain from a configuration and run a synthesis.
pub fn synthesize(config: &SynthesisConfig) -> Result<SynthesisOutput, PackingError> {
	let domain = Domain::from_config(&config.domain)?;
	Synthesizer::new(&domain, &config.phases, &config.packing).run()
}
