//! `$batch` processing
//!
//! Query parts run one by one and fail independently. Each changeset is
//! applied through [`BatchMethodHandler`] on one transaction; when it fails,
//! every item of the changeset reports an error so none appears committed.

use crate::api::headers;
use crate::datasource::DataSourceProviderRegistry;
use crate::error::{Error, Result};
use crate::processor::batch_request::{parse_batch, BatchEntry, BatchPart};
use crate::processor::write::{BatchFailure, BatchMethodHandler, ChangeSetEntity};
use crate::processor::{
    unmarshal, FunctionProcessor, OperationRegistry, ProcessorResult, QueryProcessor, QueryResult,
    ResultItem,
};
use crate::request::{BatchItem, ChangeSetInfo, ODataRequest, ODataRequestContext};
use axum::http::{HeaderMap, Method, StatusCode};
use oxidata_edm::{parse_uri, ODataUri, UriKind};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    /// Requests per batch, counting every changeset item.
    pub max_parts: usize,
    pub max_changeset_size: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_parts: 100,
            max_changeset_size: 100,
        }
    }
}

pub struct BatchProcessor<'a> {
    providers: &'a DataSourceProviderRegistry,
    operations: &'a OperationRegistry,
    limits: BatchLimits,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(
        providers: &'a DataSourceProviderRegistry,
        operations: &'a OperationRegistry,
        limits: BatchLimits,
    ) -> Self {
        Self {
            providers,
            operations,
            limits,
        }
    }

    pub fn process(&self, ctx: &Arc<ODataRequestContext>) -> Result<ProcessorResult> {
        if *ctx.method() != Method::POST {
            return Err(Error::MethodNotAllowed("$batch only accepts POST".to_string()));
        }
        let boundary = headers::content_type(ctx.headers())
            .and_then(headers::multipart_boundary)
            .ok_or_else(|| {
                Error::bad_request("$batch requires a multipart/mixed Content-Type with a boundary")
            })?;

        let entries = parse_batch(&ctx.request.body, &boundary)?;
        let total: usize = entries.iter().map(BatchEntry::len).sum();
        if total > self.limits.max_parts {
            return Err(Error::bad_request(format!(
                "batch holds {total} requests, at most {} are allowed",
                self.limits.max_parts
            )));
        }
        if let Some(oversized) = entries
            .iter()
            .find(|e| matches!(e, BatchEntry::ChangeSet { .. }) && e.len() > self.limits.max_changeset_size)
        {
            return Err(Error::bad_request(format!(
                "changeset holds {} requests, at most {} are allowed",
                oversized.len(),
                self.limits.max_changeset_size
            )));
        }

        tracing::debug!(entries = entries.len(), requests = total, "Processing batch");
        let mut results = Vec::with_capacity(total);
        for entry in entries {
            match entry {
                BatchEntry::Query(part) => results.push(self.query_part(ctx, part)),
                BatchEntry::ChangeSet { id, parts } => results.extend(self.changeset(ctx, id, parts)),
            }
        }

        Ok(ProcessorResult::from_parts(
            StatusCode::OK,
            QueryResult::Collection {
                items: results
                    .into_iter()
                    .map(|r| ResultItem::Batch(Box::new(r)))
                    .collect(),
                count: None,
            },
            HeaderMap::new(),
            Some(ctx.clone()),
        ))
    }

    fn query_part(&self, batch: &ODataRequestContext, part: BatchPart) -> ProcessorResult {
        let (ctx, uri_error) = part_context(batch, part, None);
        if let Some(error) = uri_error {
            return ProcessorResult::exception(error, Some(ctx));
        }

        let outcome = if *ctx.method() != Method::GET {
            Err(Error::MethodNotAllowed(format!(
                "{} must be placed inside a changeset",
                ctx.method()
            )))
        } else if ctx.uri().operation().is_some() {
            FunctionProcessor::new(self.providers, self.operations).process(&ctx)
        } else {
            QueryProcessor::new(self.providers).query(&ctx)
        };
        outcome.unwrap_or_else(|error| ProcessorResult::exception(error, Some(ctx.clone())))
    }

    fn changeset(
        &self,
        batch: &ODataRequestContext,
        id: String,
        parts: Vec<BatchPart>,
    ) -> Vec<ProcessorResult> {
        let info = ChangeSetInfo {
            id,
            size: parts.len(),
        };

        let mut contexts = Vec::with_capacity(parts.len());
        let mut items = Vec::with_capacity(parts.len());
        let mut failure: Option<BatchFailure> = None;
        for (index, part) in parts.into_iter().enumerate() {
            let (ctx, uri_error) = part_context(batch, part, Some(info.clone()));
            let entity = match uri_error {
                Some(error) => Err(error),
                None => unmarshal::read_entity(&ctx),
            };
            match entity {
                Ok(entity) => items.push(ChangeSetEntity {
                    context: ctx.clone(),
                    entity,
                }),
                Err(error) => {
                    failure.get_or_insert(BatchFailure {
                        index: Some(index),
                        error,
                    });
                }
            }
            contexts.push(ctx);
        }

        let outcome = match failure {
            Some(failure) => Err(failure),
            None => BatchMethodHandler::new(self.providers).apply(&items),
        };
        match outcome {
            Ok(results) => results,
            Err(failure) => {
                tracing::warn!(changeset = %info.id, "{failure}");
                let reason = failure.to_string();
                let mut error = Some(failure.error);
                contexts
                    .into_iter()
                    .enumerate()
                    .map(|(index, ctx)| {
                        let error = match failure.index {
                            Some(failed) if failed == index => error.take(),
                            _ => None,
                        }
                        .unwrap_or_else(|| Error::processor(format!("changeset rolled back: {reason}")));
                        ProcessorResult::exception(error, Some(ctx))
                    })
                    .collect()
            }
        }
    }
}

/// Request context for one batch part. A URL that does not parse yields a
/// context on the service root plus the parse error.
fn part_context(
    batch: &ODataRequestContext,
    part: BatchPart,
    changeset: Option<ChangeSetInfo>,
) -> (Arc<ODataRequestContext>, Option<Error>) {
    let item = BatchItem {
        content_id: part.content_id.clone(),
        changeset,
    };
    let (uri, error) = match resolve_url(batch, &part.url) {
        Ok(uri) => (uri, None),
        Err(error) => (
            ODataUri {
                service_root: batch.service_root().to_string(),
                kind: UriKind::ServiceRoot,
                options: Default::default(),
            },
            Some(error),
        ),
    };
    let request = ODataRequest::new(part.method, uri)
        .with_headers(part.headers)
        .with_body(part.body);
    (
        Arc::new(ODataRequestContext::for_batch_item(request, batch.edm.clone(), item)),
        error,
    )
}

/// Parses a part URL: absolute, absolute path, or relative to the service root.
fn resolve_url(batch: &ODataRequestContext, url: &str) -> Result<ODataUri> {
    let root = batch.service_root();
    let outside = || Error::bad_request(format!("{url} is outside the service root {root}"));

    let relative = if url.contains("://") {
        url.strip_prefix(root).ok_or_else(outside)?
    } else if url.starts_with('/') {
        let root_path = url::Url::parse(root)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        url.strip_prefix(root_path.as_str()).ok_or_else(outside)?
    } else {
        url
    };

    let (path, query) = match relative.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (relative, None),
    };
    Ok(parse_uri(&batch.edm, root, path, query)?)
}
