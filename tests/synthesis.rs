use microgen::packing::config::{PackingConfig, SynthesisConfig};
use microgen::packing::optimizer::PhaseOutcome;
use microgen::packing::stats::{BetaParams, PhaseRole, PhaseStats, PrecipitateStats, RdfTarget};
use microgen::packing::synthesis::{SynthesisOutput, Synthesizer, synthesize};
use microgen::voxel_grid::geometry::{Domain, DomainConfig};
use microgen::voxel_grid::grid::MATRIX;
use microgen::voxel_grid::manip::FragmentReport;
use microgen::voxel_grid::mrc_output::{MODE_FLOAT32, MRC_HEADER_BYTES, MRCHeader};

fn small_config(seed: u64) -> SynthesisConfig {
	let primary = PhaseStats::equiaxed(PhaseRole::Primary, 0.9, 1.0, 0.1);
	let mut precipitate = PhaseStats::equiaxed(PhaseRole::Precipitate, 0.1, 0.3, 0.1);
	precipitate.precipitate = Some(PrecipitateStats {
		boundary_fraction: 0.8,
		rdf: Some(RdfTarget { min_distance: 0.0, max_distance: 8.0, frequencies: vec![0.1, 0.2, 0.3, 0.4] }),
	});
	SynthesisConfig {
		domain: DomainConfig { dims: [16, 16, 16], spacing: [1.0; 3], periodic: true },
		phases: vec![primary, precipitate],
		packing: PackingConfig {
			seed: Some(seed),
			iterations_per_feature: 5,
			precipitate_iterations_per_feature: 2,
			threads: Some(2),
			show_progress: false,
			..PackingConfig::default()
		},
	}
}

fn run(seed: u64) -> SynthesisOutput {
	synthesize(&small_config(seed)).unwrap()
}

#[test]
fn every_voxel_ends_up_labeled() {
	let output = run(7);
	assert!(output.grid.feature_ids.iter().all(|&id| id >= MATRIX));
	assert_eq!(output.grid.count_pending(), 0);
	assert_eq!(output.report.seed, 7);
	assert_eq!(output.report.phases.len(), 2);
	for phase in &output.report.phases {
		assert!(!matches!(phase.outcome, PhaseOutcome::Aborted { .. }), "{}", phase.outcome);
	}
}

#[test]
fn feature_ids_are_compact_and_phases_follow_features() {
	let output = run(11);
	let max_id = output.grid.feature_ids.iter().copied().max().unwrap();
	assert_eq!(max_id as usize, output.features.len());

	let counts = output.grid.feature_voxel_counts(output.features.len());
	assert!(counts.iter().skip(1).all(|&n| n > 0));

	for (&id, &phase) in output.grid.feature_ids.iter().zip(&output.grid.phases) {
		if id > MATRIX {
			assert_eq!(phase as usize, output.features[id as usize - 1].phase);
		} else {
			assert_eq!(phase, 0);
		}
	}
	let per_phase: usize = output.report.features_per_phase.iter().sum();
	assert_eq!(per_phase, output.features.len());
	assert!(output.report.features_per_phase[1] > 0);
	assert!(output.report.features_per_phase[2] > 0);
}

#[test]
fn fixed_seed_is_reproducible() {
	let first = run(5);
	let second = run(5);
	assert_eq!(first.grid.feature_ids, second.grid.feature_ids);
	assert_eq!(first.features, second.features);
}

#[test]
fn mrc_files_hold_header_and_one_float_per_voxel() {
	let output = run(3);
	let dir = tempfile::tempdir().unwrap();
	let features = dir.path().join("features.mrc");
	let phases = dir.path().join("phases.mrc");
	output.grid.write_feature_mrc(&features).unwrap();
	output.grid.write_phase_mrc(&phases).unwrap();

	let bytes = std::fs::read(&features).unwrap();
	assert_eq!(bytes.len(), MRC_HEADER_BYTES + 16 * 16 * 16 * 4);
	let header = MRCHeader::from_bytes(&bytes).unwrap();
	assert_eq!(header.mode, MODE_FLOAT32);
	assert_eq!([header.len_i, header.len_j, header.len_k], [16, 16, 16]);
	assert_eq!(header.amax, output.features.len() as f32);

	let first = f32::from_le_bytes(bytes[MRC_HEADER_BYTES..MRC_HEADER_BYTES + 4].try_into().unwrap());
	assert_eq!(first, output.grid.feature_ids[0] as f32);

	let phase_bytes = std::fs::read(&phases).unwrap();
	let header = MRCHeader::from_bytes(&phase_bytes).unwrap();
	assert!(header.amax <= 2.0);
}

#[test]
fn masked_voxels_stay_matrix() {
	let config = small_config(9);
	let mut mask = bitvec::bitvec![1; 16 * 16 * 16];
	for index in 0..16 * 16 {
		mask.set(index, false);
	}
	let domain = Domain::from_config(&config.domain).unwrap().with_mask(mask).unwrap();
	let output = Synthesizer::new(&domain, &config.phases, &config.packing).run().unwrap();
	assert!(output.grid.feature_ids[..16 * 16].iter().all(|&id| id == MATRIX));
	assert!(output.grid.feature_ids[16 * 16..].iter().any(|&id| id > MATRIX));
}

#[test]
fn every_feature_is_one_face_connected_piece() {
	let mut output = run(13);
	assert_eq!(output.grid.remove_fragments(&[]), FragmentReport::default());
	assert_eq!(output.report.cleanup_gap_fill.remaining, 0);
}

#[test]
fn elongated_grains_are_not_split() {
	let mut primary = PhaseStats::equiaxed(PhaseRole::Primary, 1.0, 1.4, 0.2);
	primary.b_over_a = vec![BetaParams { alpha: 3.0, beta: 3.0 }];
	primary.c_over_a = vec![BetaParams { alpha: 3.0, beta: 3.0 }];
	let config = SynthesisConfig {
		domain: DomainConfig { dims: [24, 24, 24], spacing: [1.0; 3], periodic: true },
		phases: vec![primary],
		packing: PackingConfig {
			seed: Some(1),
			iterations_per_feature: 5,
			threads: Some(2),
			show_progress: false,
			..PackingConfig::default()
		},
	};
	let mut output = synthesize(&config).unwrap();
	assert_eq!(output.grid.count_pending(), 0);
	assert_eq!(output.grid.remove_fragments(&[]), FragmentReport::default());
	let counts = output.grid.feature_voxel_counts(output.features.len());
	assert!(counts.iter().skip(1).all(|&n| n > 0));
}

#[test]
fn demo_config_parses() {
	let config = SynthesisConfig::from_json(include_str!("../demos/two_phase.json")).unwrap();
	assert_eq!(config.phases.len(), 2);
	assert_eq!(config.packing.seed, Some(42));
	for (index, phase) in config.phases.iter().enumerate() {
		phase.validate(index + 1).unwrap();
	}
	assert_eq!(config.phases[1].role, PhaseRole::Precipitate);
}
