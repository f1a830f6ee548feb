//! Request processors
//!
//! Each processor turns an [`ODataRequestContext`] into a [`ProcessorResult`]:
//! an HTTP status, an optional [`QueryResult`], response headers and the
//! request context it was produced for. Results are immutable once built;
//! renderers only read them.

pub mod batch;
pub mod batch_request;
pub mod function;
pub mod model;
pub mod query;
pub mod strategy;
pub mod unmarshal;
pub mod write;

use crate::error::Error;
use crate::request::ODataRequestContext;
use axum::http::{HeaderMap, StatusCode};
use oxidata_edm::{Edm, Entity, Value};
use std::fmt;
use std::sync::{Arc, Mutex};

pub use batch::BatchProcessor;
pub use function::{FunctionProcessor, Operation, OperationOutput, OperationRegistry};
pub use model::{QueryModelBuilder, QueryOperation};
pub use query::QueryProcessor;
pub use strategy::{QueryOperationStrategy, StrategyOutcome};
pub use write::WriteProcessor;

/// Lazily produced values, consumed once by a renderer.
pub type ValueIter = Box<dyn Iterator<Item = crate::error::Result<Value>> + Send>;

pub struct ValueStream {
    inner: Mutex<Option<ValueIter>>,
}

impl ValueStream {
    pub fn new(iter: ValueIter) -> Self {
        Self {
            inner: Mutex::new(Some(iter)),
        }
    }

    /// Takes the iterator; `None` once a renderer has consumed it.
    pub fn take(&self) -> Option<ValueIter> {
        self.inner.lock().ok()?.take()
    }
}

impl fmt::Debug for ValueStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueStream")
    }
}

#[derive(Debug)]
pub enum ResultItem {
    Entity(Entity),
    Value(Value),
    Stream(ValueStream),
    /// The model itself, for the service document and `$metadata`.
    Edm(Arc<Edm>),
    /// Result of one `$batch` part.
    Batch(Box<ProcessorResult>),
}

#[derive(Debug)]
pub enum QueryResult {
    Single(ResultItem),
    Collection {
        items: Vec<ResultItem>,
        /// Total matched before paging, when `$count=true` was requested.
        count: Option<usize>,
    },
    /// Pre-rendered JSON payload from a data source.
    RawJson(String),
    Exception(Error),
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResultKind {
    Single,
    Collection,
    RawJson,
    Exception,
    Nothing,
}

impl QueryResult {
    pub fn kind(&self) -> QueryResultKind {
        match self {
            QueryResult::Single(_) => QueryResultKind::Single,
            QueryResult::Collection { .. } => QueryResultKind::Collection,
            QueryResult::RawJson(_) => QueryResultKind::RawJson,
            QueryResult::Exception(_) => QueryResultKind::Exception,
            QueryResult::Nothing => QueryResultKind::Nothing,
        }
    }

    pub fn entity(entity: Entity) -> Self {
        QueryResult::Single(ResultItem::Entity(entity))
    }

    pub fn value(value: impl Into<Value>) -> Self {
        QueryResult::Single(ResultItem::Value(value.into()))
    }

    pub fn entities(entities: Vec<Entity>) -> Self {
        QueryResult::Collection {
            items: entities.into_iter().map(ResultItem::Entity).collect(),
            count: None,
        }
    }

    pub fn as_exception(&self) -> Option<&Error> {
        match self {
            QueryResult::Exception(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ProcessorResult {
    status: StatusCode,
    result: QueryResult,
    headers: HeaderMap,
    context: Option<Arc<ODataRequestContext>>,
}

impl ProcessorResult {
    pub fn new(status: StatusCode, result: QueryResult) -> Self {
        Self {
            status,
            result,
            headers: HeaderMap::new(),
            context: None,
        }
    }

    pub fn from_parts(
        status: StatusCode,
        result: QueryResult,
        headers: HeaderMap,
        context: Option<Arc<ODataRequestContext>>,
    ) -> Self {
        Self {
            status,
            result,
            headers,
            context,
        }
    }

    /// Result carrying `error`; the status follows the error kind.
    pub fn exception(error: Error, context: Option<Arc<ODataRequestContext>>) -> Self {
        Self {
            status: error.status_code(),
            result: QueryResult::Exception(error),
            headers: HeaderMap::new(),
            context,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn query_result(&self) -> &QueryResult {
        &self.result
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn request_context(&self) -> Option<&Arc<ODataRequestContext>> {
        self.context.as_ref()
    }

    pub fn into_query_result(self) -> QueryResult {
        self.result
    }
}
