//! OData v4 service core
//!
//! Turns OData URIs into query operations against pluggable data sources,
//! applies writes (singly or inside `$batch` changesets), invokes functions
//! and actions, and renders results as JSON, Atom/XML or raw values using
//! score-based content negotiation.

// Allow clippy lints that are acceptable for this domain-specific codebase
#![allow(
    clippy::too_many_arguments,      // Functions with many args are acceptable for domain operations
    clippy::type_complexity,         // Complex types are acceptable when they represent domain concepts
    clippy::large_enum_variant,      // Large enum variants acceptable; boxing may impact performance
)]

pub mod api;
pub mod config;
pub mod datasource;
pub mod error;
pub mod logging;
pub mod operations;
pub mod processor;
pub mod render;
pub mod request;
pub mod service;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use service::ODataService;
pub use state::AppState;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::datasource::InMemoryStore;
    use oxidata_edm::{ComplexValue, Edm, Entity};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    pub fn edm() -> Arc<Edm> {
        Arc::new(Edm::from_json_str(include_str!("../model/demo.json")).unwrap())
    }

    pub fn customer(id: i64, name: &str) -> Entity {
        Entity::new("Demo.Customer")
            .with_property("Id", id)
            .with_property("Name", name)
    }

    pub fn order(id: i32, amount: i64) -> Entity {
        Entity::new("Demo.Order")
            .with_property("Id", id)
            .with_property("Amount", Decimal::new(amount, 0))
    }

    /// Customers 1 (Ann) and 2 (Bob); Ann owns orders 10 and 11, Bob owns 20.
    pub fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new(edm());
        let ann = store
            .insert(customer(1, "Ann").with_property(
                "Address",
                ComplexValue::new("Demo.Address")
                    .with_property("Street", "Main Street 1")
                    .with_property("City", "Oslo"),
            ))
            .unwrap();
        let bob = store.insert(customer(2, "Bob")).unwrap();

        for (order, owner) in [(order(10, 20), &ann), (order(11, 15), &ann), (order(20, 40), &bob)] {
            let order = store.insert(order).unwrap();
            store.link(owner, "Orders", &order).unwrap();
        }
        store
    }
}
