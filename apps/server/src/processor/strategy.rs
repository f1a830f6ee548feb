//! Query operation strategies
//!
//! A data source provider hands out a strategy for each query model it can
//! evaluate. The strategy reports one of four outcomes; only `Ok` carries a
//! result.

use crate::error::{Error, Result};
use crate::processor::QueryResult;
use crate::request::ODataRequestContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    DataSource,
    QueryProcessing,
    NotImplemented,
    BadRequest,
}

#[derive(Debug)]
pub enum StrategyOutcome {
    Ok(QueryResult),
    NotFound(String),
    /// More than one entity matched where exactly one was addressed.
    Ambiguous(String),
    Failure(FailureKind, String),
}

impl StrategyOutcome {
    pub fn into_result(self) -> Result<QueryResult> {
        match self {
            StrategyOutcome::Ok(result) => Ok(result),
            StrategyOutcome::NotFound(what) => Err(Error::EntityNotFound(what)),
            StrategyOutcome::Ambiguous(what) => Err(Error::DataSource(format!(
                "expected one result for {what}, found several"
            ))),
            StrategyOutcome::Failure(kind, message) => Err(match kind {
                FailureKind::DataSource => Error::DataSource(message),
                FailureKind::QueryProcessing => Error::QueryProcessing(message),
                FailureKind::NotImplemented => Error::NotImplemented(message),
                FailureKind::BadRequest => Error::bad_request(message),
            }),
        }
    }
}

pub trait QueryOperationStrategy: Send {
    fn execute(&self, ctx: &ODataRequestContext) -> StrategyOutcome;
}
