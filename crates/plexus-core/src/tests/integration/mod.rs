#![cfg(test)]

pub mod common;
pub mod loading_tests;
pub mod lifecycle_tests;
pub mod resolver_tests;
pub mod run_function_tests;
pub mod scan_tests;
