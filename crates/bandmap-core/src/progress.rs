//! Progress reporting
//!
//! Purely observational: nothing in the core depends on what a sink does
//! with these calls.

pub trait Progress {
    /// Record `n` more units of work done
    fn advance(&mut self, n: u64);

    /// Label the current phase ("attaching", "detaching")
    fn describe(&mut self, label: &str);

    /// Start counting from zero again
    fn reset(&mut self);
}

/// Discards all progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn advance(&mut self, _n: u64) {}

    fn describe(&mut self, _label: &str) {}

    fn reset(&mut self) {}
}
