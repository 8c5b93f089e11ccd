//! Unit test harness for warden-application.
