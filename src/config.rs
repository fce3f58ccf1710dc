//! Run configuration.
//!
//! [`SearchConfig`] collects every knob of one optimization run. The defaults
//! reproduce the reference search: 53-bit precision, round-to-nearest, 136
//! unknowns, plain BFGS updates and a checkpoint every 100 accepted steps.
//!
//! ```
//! use rktk::config::SearchConfig;
//! use rktk::minimize::UpdateRule;
//!
//! let config = SearchConfig {
//!     precision: 256,
//!     update_rule: UpdateRule::ModifiedBfgs,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.precision().bits, 256);
//! ```

use crate::error::SearchError;
use crate::minimize::UpdateRule;
use crate::numeric::Precision;
use rug::float::{Round, prec_max, prec_min};
use std::path::PathBuf;

/// Default working precision in bits
pub const DEFAULT_PRECISION: u32 = 53;

/// Number of unknowns in the reference order-condition problem
pub const DEFAULT_DIMENSION: usize = 136;

/// Accepted steps between periodic checkpoints
pub const DEFAULT_CHECKPOINT_CADENCE: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// Bit precision of every arbitrary-precision value
    pub precision: u32,
    /// Rounding mode of every arithmetic operation
    pub rounding: Round,
    /// Length of the parameter vector
    pub dimension: usize,
    /// Inverse Hessian update rule
    pub update_rule: UpdateRule,
    /// Also line search along the negative gradient on every iteration and
    /// keep whichever direction reaches the lower value
    pub compare_gradient_step: bool,
    /// Write a checkpoint whenever the iteration count is a multiple of this
    pub checkpoint_cadence: u64,
    /// Successive step doublings allowed on a decreasing ray
    pub max_doublings: usize,
    /// Half-open range random initial coordinates are drawn from
    pub initial_range: (f64, f64),
    /// Directory checkpoints are written to
    pub output_dir: PathBuf,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            precision: DEFAULT_PRECISION,
            rounding: Round::Nearest,
            dimension: DEFAULT_DIMENSION,
            update_rule: UpdateRule::Bfgs,
            compare_gradient_step: false,
            checkpoint_cadence: DEFAULT_CHECKPOINT_CADENCE,
            max_doublings: 4,
            initial_range: (0.0, 1.0),
            output_dir: PathBuf::from("."),
        }
    }
}

impl SearchConfig {
    /// Precision context for this configuration
    pub fn precision(&self) -> Precision {
        Precision::with_round(self.precision, self.rounding)
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.precision < 2 || self.precision < prec_min() || self.precision > prec_max() {
            return Err(SearchError::InvalidConfig(format!(
                "precision must be between {} and {} bits, got {}",
                prec_min().max(2),
                prec_max(),
                self.precision
            )));
        }
        if self.dimension == 0 {
            return Err(SearchError::InvalidConfig("dimension must be positive".to_string()));
        }
        if self.checkpoint_cadence == 0 {
            return Err(SearchError::InvalidConfig(
                "checkpoint cadence must be positive".to_string(),
            ));
        }
        if self.max_doublings == 0 {
            return Err(SearchError::InvalidConfig(
                "at least one step doubling is required".to_string(),
            ));
        }
        let (lo, hi) = self.initial_range;
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(SearchError::InvalidConfig(format!(
                "invalid initial range [{}, {})",
                lo, hi
            )));
        }
        Ok(())
    }
}
