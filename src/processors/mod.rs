pub mod data_merger;
pub mod integrity_checker;
pub mod normalizer;
pub mod splitter;
pub mod transform;

pub use data_merger::{DataMerger, JoinReport, SourceJoinStats};
pub use integrity_checker::{FactViolation, IntegrityChecker, IntegrityReport, ViolationType};
pub use normalizer::{NormalizeReport, Normalizer};
pub use splitter::split_star_schema;
pub use transform::DimensionalTransform;
