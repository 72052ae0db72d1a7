//! Per-address analysis.

mod address_analyzer;
mod relatives;

pub use address_analyzer::AddressAnalyzer;
pub use relatives::get_relatives_with_suggested_templates;
