pub mod rates;
pub mod retry;
pub mod sales;
pub mod webhook;

pub use rates::{HttpRateLookup, RateLookup, RateLookupError, RateMap, StaticRateLookup};
pub use retry::RetryPolicy;
pub use sales::{HttpSalesSource, SalesSource, SalesSourceError};
pub use webhook::{WebhookError, WebhookNotifier, WebhookPayload};
