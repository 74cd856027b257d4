//! Tests for profile construction, spawn preflight, and confinement.

mod support;
mod unit;
