// tests/integration/mod.rs

pub mod api_test;
pub mod cluster_test;
pub mod drain_test;
pub mod orchestration_test;
