pub mod cache_entry;
pub mod run_ledger;
pub mod signal_sample;
