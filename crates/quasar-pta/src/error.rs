//! Interprocedural analysis errors.

use quasar_tac::LiftError;
use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The root of the analysis must lift; unreachable-method lift failures
    /// degrade to the unknown-method path instead.
    #[error("root method {method} could not be prepared for analysis")]
    UnliftableRoot {
        method: String,
        #[source]
        source: LiftError,
    },

    #[error(
        "call at {offset:#06x} in {caller} passes {found} arguments, but {callee} declares {expected}"
    )]
    ArgumentCountMismatch {
        caller: String,
        callee: String,
        offset: u32,
        expected: usize,
        found: usize,
    },
}
