//! Unit test harness for warden-server.

mod cache_tests;
mod enforcer_tests;
mod service_tests;
mod test_utils;
