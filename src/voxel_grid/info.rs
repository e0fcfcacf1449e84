use std::env;
use std::sync::Once;

use indicatif::{ProgressBar, ProgressStyle};

/// Log program and compilation information (only once)
pub fn print_compile_info() {
	static PRINT_COMPILE_ONCE: Once = Once::new();
	PRINT_COMPILE_ONCE.call_once(|| {
		let program_name = env::current_exe()
			.ok()
			.as_ref()
			.and_then(|path| path.file_name())
			.and_then(|name| name.to_str())
			.unwrap_or("microgen")
			.to_string();

		log::info!("Program: {} {}", program_name, env!("CARGO_PKG_VERSION"));
		log::info!("Compiled on: {} at {}", env!("COMPILE_DATE"), env!("COMPILE_TIME"));
	});
}

/// Progress bar in the house style; hidden when `visible` is false
pub fn progress_bar(len: u64, message: &'static str, visible: bool) -> ProgressBar {
	if !visible {
		return ProgressBar::hidden();
	}
	let pb = ProgressBar::new(len);
	let style = ProgressStyle::default_bar()
		.template("{msg}: [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
		.map(|style| style.progress_chars("#>-"))
		.unwrap_or_else(|_| ProgressStyle::default_bar());
	pb.set_style(style);
	pb.set_message(message);
	pb
}
