//! Rigid-body time integration.

pub mod integrator;

pub use integrator::Integrator;
