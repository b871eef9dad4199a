pub mod constants;
pub mod filename;
pub mod hash;
pub mod progress;
pub mod rounding;

pub use constants::*;
pub use filename::{lock_file_name, normalised_path, window_dir, window_dir_name};
pub use hash::location_hash;
pub use progress::ProgressReporter;
pub use rounding::round_to;
