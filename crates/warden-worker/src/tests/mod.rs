//! Test suites for the worker crate.
