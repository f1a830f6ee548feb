//! Query model: a resource path plus query options as a tree of operations
//!
//! The builder is a pure function of the URI and the model. Path segments nest
//! inside each other from the entity set outwards; query options are applied
//! on top in evaluation order (filter, search, orderby, inline count, skip,
//! top, expand, select), so `$count=true` counts what matched before paging.

use crate::error::{Error, Result};
use oxidata_edm::{Edm, KeyValue, PathSegment, ResourcePath, UriKind};

use crate::request::ODataRequestContext;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperation {
    SelectSet {
        entity_set: String,
    },
    ByKey {
        source: Box<QueryOperation>,
        key: Vec<KeyValue>,
    },
    Navigate {
        source: Box<QueryOperation>,
        property: String,
    },
    Property {
        source: Box<QueryOperation>,
        property: String,
    },
    Count {
        source: Box<QueryOperation>,
    },
    Filter {
        source: Box<QueryOperation>,
        expression: String,
    },
    Search {
        source: Box<QueryOperation>,
        expression: String,
    },
    OrderBy {
        source: Box<QueryOperation>,
        expression: String,
    },
    InlineCount {
        source: Box<QueryOperation>,
    },
    Skip {
        source: Box<QueryOperation>,
        count: usize,
    },
    Limit {
        source: Box<QueryOperation>,
        count: usize,
    },
    Expand {
        source: Box<QueryOperation>,
        expression: String,
    },
    SelectProperties {
        source: Box<QueryOperation>,
        properties: Vec<String>,
    },
}

impl QueryOperation {
    pub fn source(&self) -> Option<&QueryOperation> {
        match self {
            QueryOperation::SelectSet { .. } => None,
            QueryOperation::ByKey { source, .. }
            | QueryOperation::Navigate { source, .. }
            | QueryOperation::Property { source, .. }
            | QueryOperation::Count { source }
            | QueryOperation::Filter { source, .. }
            | QueryOperation::Search { source, .. }
            | QueryOperation::OrderBy { source, .. }
            | QueryOperation::InlineCount { source }
            | QueryOperation::Skip { source, .. }
            | QueryOperation::Limit { source, .. }
            | QueryOperation::Expand { source, .. }
            | QueryOperation::SelectProperties { source, .. } => Some(source),
        }
    }

    /// Operations from the outermost down to the entity set.
    pub fn chain(&self) -> impl Iterator<Item = &QueryOperation> {
        std::iter::successors(Some(self), |op| op.source())
    }

    pub fn entity_set(&self) -> Option<&str> {
        self.chain().find_map(|op| match op {
            QueryOperation::SelectSet { entity_set } => Some(entity_set.as_str()),
            _ => None,
        })
    }

    fn wrap(self, f: impl FnOnce(Box<QueryOperation>) -> QueryOperation) -> QueryOperation {
        f(Box::new(self))
    }
}

pub struct QueryModelBuilder;

impl QueryModelBuilder {
    pub fn build(ctx: &ODataRequestContext) -> Result<QueryOperation> {
        let uri = ctx.uri();
        let path = match &uri.kind {
            UriKind::Resource(path) | UriKind::Ref(path) => path,
            other => {
                return Err(Error::QueryProcessing(format!(
                    "{other:?} is not a queryable resource"
                )))
            }
        };
        let mut operation = Self::build_path(&ctx.edm, path)?;

        let options = &uri.options;
        if let Some(filter) = &options.filter {
            operation = operation.wrap(|source| QueryOperation::Filter {
                source,
                expression: filter.clone(),
            });
        }
        if let Some(search) = &options.search {
            operation = operation.wrap(|source| QueryOperation::Search {
                source,
                expression: search.clone(),
            });
        }
        if let Some(orderby) = &options.orderby {
            operation = operation.wrap(|source| QueryOperation::OrderBy {
                source,
                expression: orderby.clone(),
            });
        }
        if options.count {
            operation = operation.wrap(|source| QueryOperation::InlineCount { source });
        }
        if let Some(skip) = options.skip {
            operation = operation.wrap(|source| QueryOperation::Skip { source, count: skip });
        }
        if let Some(top) = options.top {
            operation = operation.wrap(|source| QueryOperation::Limit { source, count: top });
        }
        if let Some(expand) = &options.expand {
            operation = operation.wrap(|source| QueryOperation::Expand {
                source,
                expression: expand.clone(),
            });
        }
        if let Some(select) = &options.select {
            let properties: Vec<String> = select
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty() && p != "*")
                .collect();
            if !properties.is_empty() {
                operation = operation.wrap(|source| QueryOperation::SelectProperties {
                    source,
                    properties,
                });
            }
        }

        Ok(operation)
    }

    fn build_path(edm: &Edm, path: &ResourcePath) -> Result<QueryOperation> {
        let mut current: Option<QueryOperation> = None;
        for segment in &path.segments {
            current = Some(match (segment, current.take()) {
                (PathSegment::EntitySet(name), None) => {
                    if edm.entity_set(name).is_none() {
                        return Err(Error::QueryProcessing(format!("unknown entity set {name}")));
                    }
                    QueryOperation::SelectSet {
                        entity_set: name.clone(),
                    }
                }
                (PathSegment::Key(key), Some(source)) => source.wrap(|source| QueryOperation::ByKey {
                    source,
                    key: key.clone(),
                }),
                (PathSegment::Navigation(property), Some(source)) => {
                    source.wrap(|source| QueryOperation::Navigate {
                        source,
                        property: property.clone(),
                    })
                }
                (PathSegment::Property(property), Some(source)) => {
                    source.wrap(|source| QueryOperation::Property {
                        source,
                        property: property.clone(),
                    })
                }
                (PathSegment::Count, Some(source)) => {
                    source.wrap(|source| QueryOperation::Count { source })
                }
                // `$value` selects the raw renderer; the addressed value is the same.
                (PathSegment::Value, Some(source)) => source,
                (PathSegment::Operation(call), _) => {
                    return Err(Error::QueryProcessing(format!(
                        "operation {} is not a query",
                        call.name
                    )))
                }
                (segment, _) => {
                    return Err(Error::QueryProcessing(format!(
                        "unexpected path segment {segment:?}"
                    )))
                }
            });
        }
        current.ok_or_else(|| Error::QueryProcessing("empty resource path".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ODataRequest;
    use crate::test_support;
    use axum::http::Method;

    fn build(path: &str, query: Option<&str>) -> QueryOperation {
        let edm = test_support::edm();
        let uri = oxidata_edm::parse_uri(&edm, "http://host/svc", path, query).unwrap();
        let ctx = ODataRequestContext::new(ODataRequest::new(Method::GET, uri), edm);
        QueryModelBuilder::build(&ctx).unwrap()
    }

    #[test]
    fn test_path_nests_from_entity_set() {
        let op = build("Customers(1)/Orders", None);
        match &op {
            QueryOperation::Navigate { source, property } => {
                assert_eq!(property, "Orders");
                assert!(matches!(**source, QueryOperation::ByKey { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(op.entity_set(), Some("Customers"));
    }

    #[test]
    fn test_options_wrap_in_evaluation_order() {
        let op = build(
            "Customers",
            Some("$select=Name&$top=2&$skip=1&$count=true&$orderby=Name"),
        );
        let names: Vec<&str> = op
            .chain()
            .map(|op| match op {
                QueryOperation::SelectProperties { .. } => "select",
                QueryOperation::Limit { .. } => "top",
                QueryOperation::Skip { .. } => "skip",
                QueryOperation::InlineCount { .. } => "count",
                QueryOperation::OrderBy { .. } => "orderby",
                QueryOperation::SelectSet { .. } => "set",
                _ => "other",
            })
            .collect();
        assert_eq!(names, vec!["select", "top", "skip", "count", "orderby", "set"]);
    }

    #[test]
    fn test_value_segment_is_transparent() {
        assert_eq!(
            build("Customers(1)/Name/$value", None),
            build("Customers(1)/Name", None)
        );
    }

    #[test]
    fn test_service_root_is_not_a_query() {
        let edm = test_support::edm();
        let uri = oxidata_edm::parse_uri(&edm, "http://host/svc", "", None).unwrap();
        let ctx = ODataRequestContext::new(ODataRequest::new(Method::GET, uri), edm);
        assert!(matches!(
            QueryModelBuilder::build(&ctx),
            Err(Error::QueryProcessing(_))
        ));
    }
}
