pub mod document;
pub mod invoice;
pub mod job;
pub mod line_item;
pub mod report;

pub use document::{normalize_tax_id, Document};
pub use invoice::{InvoiceRecord, InvoiceStatus, NewInvoice, RecordOutcome};
pub use job::{Job, JobStatus, JobSummary, LogLevel, LogLine, WebhookDelivery};
pub use line_item::{DateField, FieldAliases, LineItem};
pub use report::{
    FailedEntry, RunReport, RunSummary, SkipReason, SkippedEntry, SucceededEntry,
};
