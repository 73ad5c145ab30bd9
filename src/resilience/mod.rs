pub mod policy;

pub use policy::{Backoff, RetryPolicy};
