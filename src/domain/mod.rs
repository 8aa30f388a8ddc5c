pub mod eligibility;
pub mod models;
pub mod scoring;
