mod cache_tier_tests;
pub mod common;
