pub mod absorb;
pub mod design;
pub mod diagnostics;
pub mod estimator;
pub mod inference;
pub mod ols;
pub mod results;
pub mod spec;
