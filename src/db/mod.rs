pub mod export;
pub mod ledger;
pub mod memory;
pub mod padron;
pub mod pool;
pub mod schema;

pub use export::export_pending_csv;
pub use ledger::{InvoiceLedger, LedgerError, PgInvoiceLedger};
pub use memory::InMemoryLedger;
pub use padron::PadronRateLookup;
pub use pool::create_pool;
pub use schema::ensure_schema;
