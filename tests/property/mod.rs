// tests/property/mod.rs

pub mod lock_test;
