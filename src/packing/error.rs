use thiserror::Error;

/// Failures raised by the packing engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PackingError {
	#[error("unsupported shape class code {0} (expected 0..=3)")]
	InvalidShapeClass(u32),

	#[error("phase {phase}: no usable parameters in the {table} table")]
	DegenerateDistribution { phase: usize, table: &'static str },

	#[error("usable domain volume is zero")]
	EmptyDomain,

	#[error("invalid domain: {0}")]
	InvalidDomain(String),

	#[error("phase {phase}: invalid statistics: {reason}")]
	InvalidStats { phase: usize, reason: String },
}
