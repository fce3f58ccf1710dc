//! rktk prelude.
//!
//! The types needed to configure, run and checkpoint a search, importable as
//! a group.
//!
//! ```
//! use rktk::prelude::*;
//!
//! let config = SearchConfig::default();
//! assert_eq!(config.precision(), Precision::new(53));
//! ```

#[doc(no_inline)]
pub use crate::checkpoint::{CheckpointName, RunId};

#[doc(no_inline)]
pub use crate::config::SearchConfig;

#[doc(no_inline)]
pub use crate::error::SearchError;

#[doc(no_inline)]
pub use crate::minimize::{BfgsOptimizer, Status, StepKind, StepOutcome, UpdateRule};

#[doc(no_inline)]
pub use crate::numeric::Precision;

#[doc(no_inline)]
pub use crate::objective::{MultiDimGradFn, ObjFn, ObjGradFn};
