pub mod bfgs;
pub mod hessian;
pub mod line_search;

pub use self::bfgs::{BfgsOptimizer, Status, StepKind, StepOutcome};
pub use self::hessian::{Curvature, HessianUpdater, UpdateRule};
pub use self::line_search::{LineSearchResult, QuadraticLineSearch};
