//! Changeset application: all items on one transaction, all or nothing.

use super::{select_handler, WriteProcessor};
use crate::datasource::DataSourceProviderRegistry;
use crate::error::Error;
use crate::processor::ProcessorResult;
use crate::request::ODataRequestContext;
use oxidata_edm::Entity;
use std::fmt;
use std::sync::Arc;

/// One changeset request with the entity read from its body.
#[derive(Debug)]
pub struct ChangeSetEntity {
    pub context: Arc<ODataRequestContext>,
    pub entity: Option<Entity>,
}

/// Why a changeset was rolled back.
#[derive(Debug)]
pub struct BatchFailure {
    /// Item that failed; `None` when the commit itself failed.
    pub index: Option<usize>,
    pub error: Error,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "changeset item {index} failed: {}", self.error),
            None => write!(f, "changeset commit failed: {}", self.error),
        }
    }
}

pub struct BatchMethodHandler<'a> {
    providers: &'a DataSourceProviderRegistry,
}

impl<'a> BatchMethodHandler<'a> {
    pub fn new(providers: &'a DataSourceProviderRegistry) -> Self {
        Self { providers }
    }

    /// Applies `items` in order on one transaction of the first item's data source.
    pub fn apply(&self, items: &[ChangeSetEntity]) -> Result<Vec<ProcessorResult>, BatchFailure> {
        let Some(first) = items.first() else {
            return Ok(Vec::new());
        };
        let at = |index: usize| move |error: Error| BatchFailure {
            index: Some(index),
            error,
        };

        let data_source = WriteProcessor::new(self.providers)
            .data_source_for(&first.context)
            .map_err(at(0))?;
        let transaction = data_source.start_transaction().map_err(at(0))?;

        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let outcome = select_handler(item.context.method(), item.context.uri())
                .ok_or_else(|| {
                    Error::MethodNotAllowed(format!(
                        "{} is not supported in a changeset",
                        item.context.method()
                    ))
                })
                .and_then(|kind| {
                    kind.handler().apply(
                        &item.context,
                        item.entity.as_ref(),
                        transaction.as_data_source(),
                    )
                });

            match outcome {
                Ok(result) => results.push(result),
                Err(error) => {
                    tracing::error!(index, error = %error, "Changeset item failed, rolling back");
                    if let Err(e) = transaction.rollback() {
                        tracing::error!(error = %e, "Changeset rollback failed");
                    }
                    return Err(BatchFailure {
                        index: Some(index),
                        error,
                    });
                }
            }
        }

        match transaction.commit() {
            Ok(true) => {
                tracing::debug!(items = items.len(), "Changeset committed");
                Ok(results)
            }
            Ok(false) => Err(BatchFailure {
                index: None,
                error: Error::DataSource("data source declined to commit the changeset".to_string()),
            }),
            Err(error) => {
                tracing::error!(error = %error, "Changeset commit failed");
                Err(BatchFailure { index: None, error })
            }
        }
    }
}
