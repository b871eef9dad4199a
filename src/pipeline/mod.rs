pub mod controller;
pub mod stages;

pub use controller::PipelineController;
pub use stages::{
    build_star_schema, run_backfill, run_ingest, run_load, run_verify, BackfillReport,
    IngestOutcome, LoadOptions, VerifyReport,
};
