//! Remote access: the controller client and the retry wrapper around it.

mod controller;
mod retry;

pub use controller::{extract_records, parse_lenient, Controller, FetchMode, HttpController};
pub use retry::RetryingFetcher;
