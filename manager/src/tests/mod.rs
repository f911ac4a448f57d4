//! Test modules for the manager crate

mod api_tests;
mod node_tests;
mod support;
