//! Test suites for the host daemon.
