//! Arbitrary-precision quasi-Newton search for Runge-Kutta order conditions.
//!
//! The crate minimizes an order-condition residual with a BFGS iteration
//! carried out entirely in MPFR arithmetic (via `rug`), checkpointing its
//! state to self-describing files so a long search can be resumed.
//!
//! * [`minimize`] - line search, inverse Hessian updates and the optimizer
//! * [`checkpoint`] - checkpoint file names and bodies
//! * [`objective`] - the objective/gradient seam and test objectives
//! * [`numeric`], [`linalg`] - precision context and vector kernels
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod linalg;
pub mod minimize;
pub mod numeric;
pub mod objective;
pub mod prelude;
pub mod report;
