//! Mutation testing over a register-machine IR.
//!
//! A run has two scheduled phases. First every test executes against the
//! pristine program inside a sandbox while [`instrumentation`] records which
//! mutation points it reaches. Then every reached point is applied in place
//! ([`operators`]), the covering tests are re-run against the mutant, and the
//! mutation is reverted. [`report`] folds the outcomes into a mutation score.

pub mod config;
pub mod driver;
pub mod error;
pub mod instrumentation;
pub mod ir;
pub mod loader;
pub mod machine;
pub mod mutants;
pub mod operators;
pub mod output;
pub mod parallel;
pub mod report;
pub mod sandbox;
pub mod state;
pub mod tasks;
pub mod toolchain;

pub use config::{Config, Filter, SandboxKind};
pub use driver::Driver;
pub use error::EngineError;
pub use report::MutationReport;
