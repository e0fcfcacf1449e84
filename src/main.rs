use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use microgen::packing::config::SynthesisConfig;
use microgen::packing::synthesis::synthesize;
use microgen::voxel_grid::info;

#[derive(Parser, Debug)]
#[command(name = "microgen")]
#[command(about = "Pack statistically described features into a voxel volume", long_about = None)]
struct Cli {
	/// Synthesis description (domain, phase statistics, packing options) as JSON
	#[arg(short, long)]
	config: PathBuf,

	/// Output MRC file with one feature id per voxel
	#[arg(short, long, default_value = "microstructure.mrc")]
	output: PathBuf,

	/// Also write the phase id of every voxel to this MRC file
	#[arg(long)]
	phase_output: Option<PathBuf>,

	/// Write the run report as JSON
	#[arg(long)]
	report: Option<PathBuf>,

	/// Override the RNG seed from the config
	#[arg(long)]
	seed: Option<u64>,

	/// Worker threads for rasterization (default: all cores)
	#[arg(long)]
	threads: Option<usize>,

	/// Force periodic boundaries
	#[arg(long)]
	periodic: bool,

	/// Hide progress bars
	#[arg(long)]
	no_progress: bool,
}

fn main() -> Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	let cli = Cli::parse();
	info::print_compile_info();

	let text = fs::read_to_string(&cli.config).with_context(|| format!("Failed to read {}", cli.config.display()))?;
	let mut config = SynthesisConfig::from_json(&text).with_context(|| format!("Failed to parse {}", cli.config.display()))?;
	if cli.seed.is_some() {
		config.packing.seed = cli.seed;
	}
	if cli.threads.is_some() {
		config.packing.threads = cli.threads;
	}
	if cli.periodic {
		config.domain.periodic = true;
	}
	if cli.no_progress {
		config.packing.show_progress = false;
	}

	let output = synthesize(&config).context("Synthesis failed")?;

	println!("Seed: {}", output.report.seed);
	for phase in &output.report.phases {
		let label = config.phases[phase.phase - 1].label(phase.phase);
		println!(
			"{}: {} features, {}, filling error {:.4}, size error {:.4}",
			label, phase.features, phase.outcome, phase.filling_error, phase.size_distribution_error
		);
	}
	if let Some(similarity) = output.report.neighborhood_similarity {
		println!("Neighborhood similarity: {:.4}", similarity);
	}

	output
		.grid
		.write_feature_mrc(&cli.output)
		.with_context(|| format!("Failed to write {}", cli.output.display()))?;
	if let Some(path) = &cli.phase_output {
		output.grid.write_phase_mrc(path).with_context(|| format!("Failed to write {}", path.display()))?;
	}
	if let Some(path) = &cli.report {
		let json = serde_json::to_string_pretty(&output.report)?;
		fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
		log::info!("Report saved: {}", path.display());
	}
	Ok(())
}
