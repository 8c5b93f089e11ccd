//! Unit test harness for warden-infrastructure.

mod config_tests;
mod repository_tests;
