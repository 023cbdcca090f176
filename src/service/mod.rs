pub mod aggregator;
pub mod batch;
pub mod jobs;
pub mod lifecycle;
pub mod run_log;
pub mod withholding;

pub use aggregator::aggregate;
pub use batch::{BatchRunner, RunError, RunProgress};
pub use jobs::{JobError, JobManager, JobRegistry};
pub use lifecycle::{DocumentOutcome, DocumentProcessor, DocumentState, ProcessError};
pub use run_log::RunLog;
pub use withholding::{expected_withholding, round_money, Assessment, WithholdingCalculator, WithholdingError};
