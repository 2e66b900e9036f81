pub mod findings;
pub mod status;
