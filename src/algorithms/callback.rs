use std::fmt::Write;

use log::info;

use crate::array::DataArray;

/// Read-only view handed to callbacks after every completed iteration.
#[derive(Clone, Copy, Debug)]
pub struct IterationInfo<'a> {
    pub solver: &'a str,
    pub iteration: usize,
    pub x: &'a DataArray,
    pub objective: Option<f64>,
    pub dual_objective: Option<f64>,
    pub change: f64,
}

impl IterationInfo<'_> {
    /// One progress line, e.g. `[fista] iter      5 | f  1.234560e+00 | dx  3.000e-02`.
    pub fn format_line(&self) -> String {
        let mut line = format!("[{}] iter {:>6}", self.solver, self.iteration);
        if let Some(v) = self.objective {
            let _ = write!(line, " | f {:>13.6e}", v);
        }
        if let Some(v) = self.dual_objective {
            let _ = write!(line, " | dual {:>13.6e}", v);
        }
        let _ = write!(line, " | dx {:>10.3e}", self.change);
        line
    }
}

/// Per-iteration hook; closures taking `&IterationInfo` implement it.
pub trait Callback: Send {
    fn on_iteration(&mut self, info: &IterationInfo<'_>);
}

impl<F> Callback for F
where
    F: FnMut(&IterationInfo<'_>) + Send,
{
    fn on_iteration(&mut self, info: &IterationInfo<'_>) {
        self(info)
    }
}

/// Logs a progress line at `info` level every `every` iterations.
#[derive(Clone, Copy, Debug)]
pub struct LogCallback {
    every: usize,
}

impl LogCallback {
    pub fn new(every: usize) -> Self {
        Self { every: every.max(1) }
    }
}

impl Default for LogCallback {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Callback for LogCallback {
    fn on_iteration(&mut self, info: &IterationInfo<'_>) {
        if info.iteration % self.every == 0 {
            info!("{}", info.format_line());
        }
    }
}
