use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::packing::config::PackingConfig;
use crate::packing::error::PackingError;
use crate::packing::feature::Feature;
use crate::packing::histogram::{SizeDistribution, target_neighbor_distribution};
use crate::packing::orientation::{OrientationSampler, pick_weighted_bin};
use crate::packing::packing_grid::PackingGrid;
use crate::packing::sampler::ShapeSampler;
use crate::packing::shape::{FeatureShape, Footprint, ShapeClass};
use crate::packing::spatial::{NeighborTracker, RdfTracker, fold_into_domain};
use crate::packing::stats::{PhaseRole, PhaseStats};
use crate::voxel_grid::geometry::{Domain, Lattice};
use crate::voxel_grid::info::progress_bar;

/// Candidate draws without an accepted feature before one is forced in
const MAX_GENERATION_RETRIES: usize = 100_000;

/// Random free-cell draws before placement scans for an eligible cell
const MAX_PLACEMENT_DRAWS: usize = 1_000;

/// Cooperative cancellation flag shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::Relaxed);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerState {
	Generating,
	Placing,
	Refining,
	Done,
}

/// How a phase's optimization ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseOutcome {
	Converged,
	Stalled { iterations: usize },
	Aborted { reason: String },
	Cancelled,
}

impl std::fmt::Display for PhaseOutcome {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			PhaseOutcome::Converged => write!(f, "converged"),
			PhaseOutcome::Stalled { iterations } => write!(f, "stalled after {} iterations", iterations),
			PhaseOutcome::Aborted { reason } => write!(f, "aborted due to {}", reason),
			PhaseOutcome::Cancelled => write!(f, "cancelled"),
		}
	}
}

/// Goodness-of-fit summary of one phase. Errors are `1 - similarity`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseReport {
	pub phase: usize,
	pub role: PhaseRole,
	pub outcome: PhaseOutcome,
	pub features: usize,
	pub filling_error: f32,
	pub size_distribution_error: f32,
	pub neighborhood_error: Option<f32>,
	pub rdf_error: Option<f32>,
	pub accepted_moves: usize,
	pub iterations: usize,
}

impl PhaseReport {
	pub fn aborted(phase: usize, role: PhaseRole, error: &PackingError) -> Self {
		Self::unplaced(phase, role, PhaseOutcome::Aborted { reason: error.to_string() })
	}

	/// Report for a phase that was skipped before any feature was placed
	pub fn unplaced(phase: usize, role: PhaseRole, outcome: PhaseOutcome) -> Self {
		Self {
			phase,
			role,
			outcome,
			features: 0,
			filling_error: 0.0,
			size_distribution_error: 1.0,
			neighborhood_error: None,
			rdf_error: None,
			accepted_moves: 0,
			iterations: 0,
		}
	}
}

/// Features of one phase plus how well they fit.
#[derive(Debug, Clone)]
pub struct PhaseRun {
	pub features: Vec<Feature>,
	pub report: PhaseReport,
}

/// Output of the GENERATING state
#[derive(Debug, Clone)]
pub struct Generated {
	pub features: Vec<Feature>,
	pub volume: f32,
	pub size_similarity: f32,
	pub cancelled: bool,
}

/// Voxel sites precipitates are seeded on.
#[derive(Debug, Clone)]
pub struct PrecipitateSites {
	pub voxels: Lattice,
	/// Voxels on a boundary of the primary structure
	pub boundary: Vec<usize>,
	/// Every other eligible voxel
	pub interior: Vec<usize>,
}

/// Quantity refinement tries to improve; larger is better.
enum Objective {
	Filling,
	Rdf(RdfTracker),
	Neighbors(Vec<Vec<f32>>),
}

/// A proposed precipitate relocation: packing id, feature index, old and
/// new centroid.
#[derive(Debug, Clone, Copy)]
struct PrecipitateMove {
	id: usize,
	index: usize,
	from: [f32; 3],
	to: [f32; 3],
}

struct Refinement {
	iterations: usize,
	accepted: usize,
	outcome: PhaseOutcome,
}

/// Stochastic placement of one phase's features.
pub struct PhaseOptimizer<'a> {
	phase: usize,
	stats: &'a PhaseStats,
	config: &'a PackingConfig,
	domain: &'a Domain,
	cancel: &'a CancelToken,
	orientation: &'a dyn OrientationSampler,
	state: OptimizerState,
}

impl<'a> PhaseOptimizer<'a> {
	pub fn new(
		phase: usize,
		stats: &'a PhaseStats,
		config: &'a PackingConfig,
		domain: &'a Domain,
		cancel: &'a CancelToken,
		orientation: &'a dyn OrientationSampler,
	) -> Self {
		Self { phase, stats, config, domain, cancel, orientation, state: OptimizerState::Generating }
	}

	pub fn state(&self) -> OptimizerState {
		self.state
	}

	fn enter(&mut self, state: OptimizerState) {
		log::debug!("Phase {}: {:?} -> {:?}", self.phase, self.state, state);
		self.state = state;
	}

	/// Widening of the volume target that makes up for features later cut
	/// by the walls of a bounded domain.
	fn boundary_loss_factor(&self, generated: usize) -> f32 {
		let [sx, sy, sz] = self.domain.size();
		let n = generated as f32;
		let count = |a: f32, b: f32, c: f32| (n * (a / b) * (a / c)).cbrt() + 1.0;
		let nx = count(sx, sy, sz);
		let ny = count(sy, sx, sz);
		let nz = count(sz, sx, sy);
		let inner = (nx - 2.0).max(0.0) * (ny - 2.0).max(0.0) * (nz - 2.0).max(0.0);
		0.25 * (1.0 - inner / (nx * ny * nz))
	}

	/// GENERATING: draw features until their volume reaches `target_volume`.
	pub fn generate(&mut self, sampler: &ShapeSampler, target_volume: f32, rng: &mut StdRng) -> Result<Generated, PackingError> {
		self.enter(OptimizerState::Generating);
		let mut distribution = SizeDistribution::new(self.stats);
		let mut features = Vec::new();
		let mut volume = 0.0f32;
		let mut similarity = 0.0f32;
		let mut target = target_volume;
		let passes = if self.domain.periodic { 1 } else { 2 };

		for pass in 0..passes {
			if pass == 1 {
				let widen = self.boundary_loss_factor(features.len());
				target *= 1.0 + widen;
				log::debug!("Phase {}: bounded domain, widening volume target by {:.3}", self.phase, widen);
			}
			let mut retries = 0usize;
			while volume < target {
				if self.cancel.is_cancelled() {
					return Ok(Generated { features, volume, size_similarity: similarity, cancelled: true });
				}
				let feature = sampler.sample(rng)?;
				let trial = distribution.similarity_with(feature.equivalent_diameter);
				let threshold = 1.0 - retries as f32 * self.config.size_tolerance_step;
				let accept = trial >= similarity
					|| trial >= threshold
					|| volume < self.config.bootstrap_fraction * target
					|| retries >= MAX_GENERATION_RETRIES;
				if accept {
					distribution.add(feature.equivalent_diameter);
					volume += feature.volume;
					similarity = trial;
					features.push(feature);
					retries = 0;
				} else {
					retries += 1;
				}
			}
		}

		log::debug!(
			"Phase {}: generated {} features, volume {:.2} of {:.2}, size similarity {:.4}",
			self.phase,
			features.len(),
			volume,
			target_volume,
			similarity
		);
		Ok(Generated { features, volume, size_similarity: similarity, cancelled: false })
	}

	fn footprints(&self, class: ShapeClass, features: &[Feature], lattice: &Lattice) -> Vec<Footprint> {
		features
			.iter()
			.map(|f| FeatureShape::new(class, f).inflated(self.config.exclusion_inflation).footprint(lattice))
			.collect()
	}

	fn neighbor_tracker(&self, features: &[Feature]) -> NeighborTracker {
		NeighborTracker::new(
			self.domain.size(),
			self.domain.periodic,
			features.iter().map(|f| f.equivalent_diameter).collect(),
			features.iter().map(|f| self.stats.size_bin(f.equivalent_diameter)).collect(),
		)
	}

	/// Eligibility of the voxel under a packing cell's center
	fn cell_eligible(&self, lattice: &Lattice, cell: usize) -> bool {
		if self.domain.mask.is_none() {
			return true;
		}
		let voxels = self.domain.voxel_lattice();
		let index = voxels.coord_index(voxels.cell_of(lattice.cell_center(cell)));
		self.domain.is_eligible(index)
	}

	fn finish(&mut self, features: Vec<Feature>, report: PhaseReport) -> PhaseRun {
		self.enter(OptimizerState::Done);
		log::info!(
			"Phase {}: {} features, {} ({} of {} moves accepted)",
			self.phase,
			report.features,
			report.outcome,
			report.accepted_moves,
			report.iterations
		);
		PhaseRun { features, report }
	}

	fn base_report(&self, generated: &Generated) -> PhaseReport {
		PhaseReport {
			phase: self.phase,
			role: self.stats.role,
			outcome: PhaseOutcome::Converged,
			features: 0,
			filling_error: 0.0,
			size_distribution_error: 1.0 - generated.size_similarity,
			neighborhood_error: None,
			rdf_error: None,
			accepted_moves: 0,
			iterations: 0,
		}
	}

	/// Run a primary phase on the shared packing `grid`. Feature `i` takes
	/// packing id `id_offset + i + 1`.
	pub fn run_primary(&mut self, grid: &mut PackingGrid, id_offset: usize, target_volume: f32, rng: &mut StdRng) -> PhaseRun {
		let sampler = match ShapeSampler::new(self.phase, self.stats, self.orientation) {
			Ok(sampler) => sampler,
			Err(e) => return self.abort(e),
		};
		let generated = match self.generate(&sampler, target_volume, rng) {
			Ok(generated) => generated,
			Err(e) => return self.abort(e),
		};
		let mut report = self.base_report(&generated);
		if generated.cancelled {
			report.outcome = PhaseOutcome::Cancelled;
			return self.finish(Vec::new(), report);
		}

		self.enter(OptimizerState::Placing);
		let lattice = *grid.lattice();
		let mut features = generated.features;
		let footprints = self.footprints(sampler.class(), &features, &lattice);
		let mut cells = Vec::with_capacity(features.len());
		for (i, feature) in features.iter_mut().enumerate() {
			if self.cancel.is_cancelled() {
				report.outcome = PhaseOutcome::Cancelled;
				break;
			}
			let cell = self.first_free_cell(grid, &lattice, rng);
			let coord = lattice.cell_coord(cell);
			feature.centroid = lattice.cell_center(cell);
			grid.insert(id_offset + i + 1, footprints[i].cells_at(coord, &lattice));
			cells.push(coord);
			log::trace!("Phase {}: placed feature {}, filling error {:.4}", self.phase, i + 1, grid.filling_error());
		}
		features.truncate(cells.len());

		if report.outcome != PhaseOutcome::Cancelled {
			self.enter(OptimizerState::Refining);
			let refinement = self.refine_primary(grid, id_offset, &mut features, &mut cells, &footprints, rng);
			report.outcome = refinement.outcome;
			report.iterations = refinement.iterations;
			report.accepted_moves = refinement.accepted;
		}

		let mut neighbors = self.neighbor_tracker(&features);
		for (i, feature) in features.iter().enumerate() {
			neighbors.place(i, feature.centroid);
		}
		for (feature, &count) in features.iter_mut().zip(neighbors.counts()) {
			feature.neighbor_count = count;
		}
		report.neighborhood_error = target_neighbor_distribution(self.stats).map(|t| 1.0 - neighbors.similarity(&t));
		report.filling_error = grid.filling_error();
		report.features = features.len();
		self.finish(features, report)
	}

	/// Uniformly drawn free cell under an eligible voxel. Falls back to any
	/// eligible free cell, then to any cell, once the draws run out.
	fn first_free_cell(&self, grid: &mut PackingGrid, lattice: &Lattice, rng: &mut StdRng) -> usize {
		let mut cell = grid.pick_random_available_cell(rng);
		for _ in 0..MAX_PLACEMENT_DRAWS {
			if grid.owners(cell) == 0 && self.cell_eligible(lattice, cell) {
				return cell;
			}
			cell = grid.pick_random_available_cell(rng);
		}
		grid
			.available_cells()
			.iter()
			.copied()
			.find(|&c| self.cell_eligible(lattice, c))
			.unwrap_or(cell)
	}

	/// Feature to move: preferably one whose centroid cell is overlapped
	fn pick_moved_feature(grid: &PackingGrid, lattice: &Lattice, cells: &[[isize; 3]], rng: &mut StdRng) -> usize {
		let n = cells.len();
		let start = rng.random_range(0..n);
		(0..n)
			.map(|step| (start + step) % n)
			.find(|&i| grid.owners(lattice.coord_index(cells[i])) > 1)
			.unwrap_or(start)
	}

	/// Move feature `id` so its footprint is centered on `proposal`. The move
	/// is undone unless the filling error stays the same or drops.
	fn try_primary_move(grid: &mut PackingGrid, id: usize, footprint: &Footprint, proposal: [isize; 3]) -> bool {
		let lattice = *grid.lattice();
		let before = grid.filling_error();
		let old_cells = grid.remove(id).unwrap_or_default();
		grid.insert(id, footprint.cells_at(proposal, &lattice));
		if grid.filling_error() <= before {
			true
		} else {
			grid.insert(id, old_cells);
			false
		}
	}

	fn refine_primary(
		&mut self,
		grid: &mut PackingGrid,
		id_offset: usize,
		features: &mut [Feature],
		cells: &mut [[isize; 3]],
		footprints: &[Footprint],
		rng: &mut StdRng,
	) -> Refinement {
		let lattice = *grid.lattice();
		let n = features.len();
		let total = self.config.iterations_per_feature * n.saturating_sub(1);
		let reach = self.config.nudge_cells.round().max(1.0) as i64;
		let pb = progress_bar(total as u64, "Refining placement", self.config.show_progress);
		let mut refinement = Refinement { iterations: 0, accepted: 0, outcome: PhaseOutcome::Converged };
		let mut rejected_run = 0usize;

		for iteration in 0..total {
			if self.cancel.is_cancelled() {
				refinement.outcome = PhaseOutcome::Cancelled;
				break;
			}
			refinement.iterations += 1;
			pb.inc(1);

			let i = Self::pick_moved_feature(grid, &lattice, cells, rng);
			let proposal = if iteration % 2 == 0 {
				lattice.cell_coord(grid.pick_random_available_cell(rng))
			} else {
				let old = cells[i];
				lattice.fold_coord([
					old[0] + rng.random_range(-reach..=reach) as isize,
					old[1] + rng.random_range(-reach..=reach) as isize,
					old[2] + rng.random_range(-reach..=reach) as isize,
				])
			};

			let accepted = proposal != cells[i]
				&& self.cell_eligible(&lattice, lattice.coord_index(proposal))
				&& Self::try_primary_move(grid, id_offset + i + 1, &footprints[i], proposal);

			if accepted {
				cells[i] = proposal;
				features[i].centroid = lattice.cell_center(lattice.coord_index(proposal));
				refinement.accepted += 1;
				rejected_run = 0;
				log::trace!("Phase {}: move {} accepted, filling error {:.4}", self.phase, iteration, grid.filling_error());
			} else {
				rejected_run += 1;
				if self.config.stall_window > 0 && rejected_run >= self.config.stall_window {
					refinement.outcome = PhaseOutcome::Stalled { iterations: refinement.iterations };
					break;
				}
			}
		}
		pb.finish_and_clear();
		refinement
	}

	fn abort(&mut self, error: PackingError) -> PhaseRun {
		log::warn!("Phase {} aborted: {}", self.phase, error);
		self.enter(OptimizerState::Done);
		PhaseRun { features: Vec::new(), report: PhaseReport::aborted(self.phase, self.stats.role, &error) }
	}

	/// Voxel to seed a precipitate on: a boundary voxel with probability
	/// `boundary_fraction`, walking forward past voxels whose packing cell
	/// is already excluded.
	fn pick_site(&self, sites: &PrecipitateSites, grid: &PackingGrid, rng: &mut StdRng) -> Option<[f32; 3]> {
		let use_boundary = !sites.boundary.is_empty()
			&& (sites.interior.is_empty() || rng.random::<f32>() < self.stats.boundary_fraction());
		let pool = if use_boundary { &sites.boundary } else { &sites.interior };
		if pool.is_empty() {
			return None;
		}
		let lattice = grid.lattice();
		let start = rng.random_range(0..pool.len());
		let free = (0..pool.len()).map(|step| pool[(start + step) % pool.len()]).find(|&voxel| {
			let at = sites.voxels.cell_center(voxel);
			grid.owners(lattice.coord_index(lattice.cell_of(at))) == 0
		});
		Some(sites.voxels.cell_center(free.unwrap_or(pool[start])))
	}

	/// Eligibility of the voxel containing `p`
	fn point_eligible(&self, p: [f32; 3]) -> bool {
		if self.domain.mask.is_none() {
			return true;
		}
		let voxels = self.domain.voxel_lattice();
		self.domain.is_eligible(voxels.coord_index(voxels.cell_of(p)))
	}

	fn place_precipitate(grid: &mut PackingGrid, id: usize, footprint: &Footprint, at: [f32; 3]) {
		let lattice = *grid.lattice();
		grid.insert(id, footprint.cells_at(lattice.cell_of(at), &lattice));
	}

	/// Run a precipitate phase. Precipitates of all phases share `grid`;
	/// feature `i` takes packing id `id_offset + i + 1`.
	pub fn run_precipitate(
		&mut self,
		grid: &mut PackingGrid,
		id_offset: usize,
		sites: &PrecipitateSites,
		target_volume: f32,
		rng: &mut StdRng,
	) -> PhaseRun {
		let sampler = match ShapeSampler::new(self.phase, self.stats, self.orientation) {
			Ok(sampler) => sampler,
			Err(e) => return self.abort(e),
		};
		let generated = match self.generate(&sampler, target_volume, rng) {
			Ok(generated) => generated,
			Err(e) => return self.abort(e),
		};
		let mut report = self.base_report(&generated);
		if generated.cancelled {
			report.outcome = PhaseOutcome::Cancelled;
			return self.finish(Vec::new(), report);
		}

		self.enter(OptimizerState::Placing);
		let lattice = *grid.lattice();
		let mut features = generated.features;
		let footprints = self.footprints(sampler.class(), &features, &lattice);
		let mut neighbors = self.neighbor_tracker(&features);
		let mut objective = match (self.stats.rdf(), target_neighbor_distribution(self.stats)) {
			(Some(rdf), _) => Objective::Rdf(RdfTracker::new(
				rdf,
				features.len(),
				self.domain.size(),
				self.domain.periodic,
				self.domain.diagonal(),
			)),
			(None, Some(table)) => Objective::Neighbors(table),
			(None, None) => Objective::Filling,
		};

		let mut placed = 0;
		for (i, feature) in features.iter_mut().enumerate() {
			if self.cancel.is_cancelled() {
				report.outcome = PhaseOutcome::Cancelled;
				break;
			}
			let Some(at) = self.pick_site(sites, grid, rng) else {
				log::warn!("Phase {}: no eligible voxel to seed precipitates on", self.phase);
				break;
			};
			feature.centroid = at;
			Self::place_precipitate(grid, id_offset + i + 1, &footprints[i], at);
			neighbors.place(i, at);
			if let Objective::Rdf(rdf) = &mut objective {
				rdf.place(i, at);
				log::trace!("Phase {}: placed precipitate {}, RDF similarity {:.4}", self.phase, i + 1, rdf.similarity());
			}
			placed += 1;
		}
		features.truncate(placed);

		if report.outcome != PhaseOutcome::Cancelled && placed > 0 {
			self.enter(OptimizerState::Refining);
			let refinement = self.refine_precipitates(
				grid,
				id_offset,
				sites,
				&mut features,
				&footprints,
				&mut neighbors,
				&mut objective,
				rng,
			);
			report.outcome = refinement.outcome;
			report.iterations = refinement.iterations;
			report.accepted_moves = refinement.accepted;
		}

		for (feature, &count) in features.iter_mut().zip(neighbors.counts()) {
			feature.neighbor_count = count;
		}
		report.neighborhood_error = target_neighbor_distribution(self.stats).map(|t| 1.0 - neighbors.similarity(&t));
		if let Objective::Rdf(rdf) = &objective {
			report.rdf_error = Some(1.0 - rdf.similarity());
		}
		report.filling_error = grid.filling_error();
		report.features = features.len();
		self.finish(features, report)
	}

	fn score(objective: &Objective, grid: &PackingGrid, neighbors: &NeighborTracker) -> f32 {
		match objective {
			Objective::Filling => -grid.filling_error(),
			Objective::Rdf(rdf) => rdf.similarity(),
			Objective::Neighbors(target) => neighbors.similarity(target),
		}
	}

	/// Point at a distance drawn from the target RDF around another precipitate
	fn rdf_relocation(&self, features: &[Feature], moved: usize, rng: &mut StdRng) -> Option<[f32; 3]> {
		let rdf = self.stats.rdf()?;
		if features.len() < 2 {
			return None;
		}
		let mut partner = rng.random_range(0..features.len() - 1);
		if partner >= moved {
			partner += 1;
		}
		let bin = pick_weighted_bin(&rdf.frequencies, rng)?;
		let dist = rdf.min_distance + (bin as f32 + rng.random::<f32>()) * rdf.step();
		let z: f32 = rng.random_range(-1.0..=1.0);
		let phi: f32 = rng.random_range(0.0..TAU);
		let ring = (1.0 - z * z).max(0.0).sqrt();
		let origin = features[partner].centroid;
		Some(fold_into_domain(
			[origin[0] + dist * ring * phi.cos(), origin[1] + dist * ring * phi.sin(), origin[2] + dist * z],
			self.domain.size(),
			self.domain.periodic,
		))
	}

	/// Move a precipitate and keep the move only if the objective does not
	/// get worse. A rejected move restores the grid and both trackers.
	fn try_precipitate_move(
		grid: &mut PackingGrid,
		step: PrecipitateMove,
		footprint: &Footprint,
		neighbors: &mut NeighborTracker,
		objective: &mut Objective,
	) -> bool {
		let before = Self::score(objective, grid, neighbors);
		let old_cells = grid.remove(step.id).unwrap_or_default();
		Self::place_precipitate(grid, step.id, footprint, step.to);
		neighbors.place(step.index, step.to);
		if let Objective::Rdf(rdf) = objective {
			rdf.place(step.index, step.to);
		}
		if Self::score(objective, grid, neighbors) >= before {
			return true;
		}
		grid.insert(step.id, old_cells);
		neighbors.place(step.index, step.from);
		if let Objective::Rdf(rdf) = objective {
			rdf.place(step.index, step.from);
		}
		false
	}

	#[allow(clippy::too_many_arguments)]
	fn refine_precipitates(
		&mut self,
		grid: &mut PackingGrid,
		id_offset: usize,
		sites: &PrecipitateSites,
		features: &mut [Feature],
		footprints: &[Footprint],
		neighbors: &mut NeighborTracker,
		objective: &mut Objective,
		rng: &mut StdRng,
	) -> Refinement {
		let n = features.len();
		let total = self.config.precipitate_iterations_per_feature * n;
		let lattice = *grid.lattice();
		let reach = [0, 1, 2].map(|axis| self.config.nudge_cells * lattice.spacing[axis]);
		let pb = progress_bar(total as u64, "Refining precipitates", self.config.show_progress);
		let mut refinement = Refinement { iterations: 0, accepted: 0, outcome: PhaseOutcome::Converged };
		let mut rejected_run = 0usize;

		for iteration in 0..total {
			if self.cancel.is_cancelled() {
				refinement.outcome = PhaseOutcome::Cancelled;
				break;
			}
			refinement.iterations += 1;
			pb.inc(1);

			let i = rng.random_range(0..n);
			let old = features[i].centroid;
			let proposal = match iteration % 3 {
				0 => self.pick_site(sites, grid, rng),
				1 => Some(fold_into_domain(
					[
						old[0] + rng.random_range(-1.0..=1.0) * reach[0],
						old[1] + rng.random_range(-1.0..=1.0) * reach[1],
						old[2] + rng.random_range(-1.0..=1.0) * reach[2],
					],
					self.domain.size(),
					self.domain.periodic,
				)),
				_ => self.rdf_relocation(features, i, rng).or_else(|| self.pick_site(sites, grid, rng)),
			};
			let accepted = match proposal.filter(|&p| self.point_eligible(p)) {
				Some(to) => {
					let moved = Self::try_precipitate_move(
						grid,
						PrecipitateMove { id: id_offset + i + 1, index: i, from: old, to },
						&footprints[i],
						neighbors,
						objective,
					);
					if moved {
						features[i].centroid = to;
					}
					moved
				}
				None => false,
			};

			if accepted {
				refinement.accepted += 1;
				rejected_run = 0;
			} else {
				rejected_run += 1;
				if self.config.stall_window > 0 && rejected_run >= self.config.stall_window {
					refinement.outcome = PhaseOutcome::Stalled { iterations: refinement.iterations };
					break;
				}
			}
		}
		pb.finish_and_clear();
		refinement
	}
}
