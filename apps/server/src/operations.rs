//! Operations backing the functions and actions of the bundled demo model.

use crate::datasource::{EntityAddress, InMemoryStore};
use crate::error::{Error, Result};
use crate::processor::function::{Operation, OperationContext, OperationOutput};
use crate::processor::OperationRegistry;
use oxidata_edm::{ODataUri, PrimitiveValue, UriKind, Value};
use rust_decimal::Decimal;

/// Registers every demo operation against `store`. `Demo.Reset` reloads `seed`.
pub fn register_demo_operations(
    registry: &mut OperationRegistry,
    store: &InMemoryStore,
    seed: Option<serde_json::Value>,
) {
    let top = store.clone();
    registry.register("Demo.TopCustomers", move || {
        Box::new(TopCustomers {
            store: top.clone(),
            count: 0,
        })
    });
    registry.register("Demo.Greet", || Box::<Greet>::default());
    registry.register("Demo.Sequence", || Box::<Sequence>::default());
    let totals = store.clone();
    registry.register("Demo.OrderTotal", move || {
        Box::new(OrderTotal {
            store: totals.clone(),
        })
    });
    registry.register("Demo.Rename", || Box::<Rename>::default());
    let reset = store.clone();
    registry.register("Demo.Reset", move || {
        Box::new(Reset {
            store: reset.clone(),
            seed: seed.clone(),
        })
    });
}

fn integer(name: &str, value: &Value) -> Result<i64> {
    match value.as_primitive() {
        Some(PrimitiveValue::Int64(v)) => Ok(*v),
        Some(PrimitiveValue::Int32(v)) => Ok(i64::from(*v)),
        Some(PrimitiveValue::Int16(v)) => Ok(i64::from(*v)),
        Some(PrimitiveValue::Byte(v)) => Ok(i64::from(*v)),
        Some(PrimitiveValue::SByte(v)) => Ok(i64::from(*v)),
        _ => Err(Error::bad_request_at(format!("{name} must be an integer"), name)),
    }
}

fn text(value: &Value) -> Option<String> {
    value.as_primitive().map(PrimitiveValue::to_text)
}

/// First `count` customers in key order.
struct TopCustomers {
    store: InMemoryStore,
    count: i64,
}

impl Operation for TopCustomers {
    fn set_parameter(&mut self, name: &str, value: Value) -> Result<()> {
        if name == "count" {
            self.count = integer(name, &value)?;
            if self.count < 0 {
                return Err(Error::bad_request_at("count must not be negative", name));
            }
        }
        Ok(())
    }

    fn execute(&mut self, _ctx: &OperationContext<'_>) -> Result<Option<OperationOutput>> {
        let mut customers = self.store.entities("Customers")?;
        customers.sort_by_key(|c| match c.property("Id").and_then(Value::as_primitive) {
            Some(PrimitiveValue::Int64(id)) => *id,
            _ => i64::MAX,
        });
        customers.truncate(usize::try_from(self.count).unwrap_or(usize::MAX));
        Ok(Some(OperationOutput::Entities(customers)))
    }
}

#[derive(Default)]
struct Greet {
    name: Option<String>,
    title: Option<String>,
}

impl Operation for Greet {
    fn set_parameter(&mut self, name: &str, value: Value) -> Result<()> {
        match name {
            "name" => self.name = text(&value),
            "title" => self.title = text(&value),
            _ => {}
        }
        Ok(())
    }

    fn execute(&mut self, _ctx: &OperationContext<'_>) -> Result<Option<OperationOutput>> {
        let name = self.name.clone().unwrap_or_default();
        let greeting = match &self.title {
            Some(title) => format!("Hello, {title} {name}"),
            None => format!("Hello, {name}"),
        };
        Ok(Some(OperationOutput::Value(Value::from(greeting))))
    }
}

/// Integers from `from` to `to`, inclusive; streamed on chunked requests.
#[derive(Default)]
struct Sequence {
    from: i32,
    to: i32,
}

impl Operation for Sequence {
    fn set_parameter(&mut self, name: &str, value: Value) -> Result<()> {
        let number = i32::try_from(integer(name, &value)?)
            .map_err(|_| Error::bad_request_at(format!("{name} is out of range"), name))?;
        match name {
            "from" => self.from = number,
            "to" => self.to = number,
            _ => {}
        }
        Ok(())
    }

    fn execute(&mut self, _ctx: &OperationContext<'_>) -> Result<Option<OperationOutput>> {
        let values = (self.from..=self.to).map(Value::from).collect();
        Ok(Some(OperationOutput::Value(Value::Collection(values))))
    }

    fn execute_streaming(&mut self, _ctx: &OperationContext<'_>) -> Result<Option<OperationOutput>> {
        let (from, to) = (self.from, self.to);
        Ok(Some(OperationOutput::Stream(Box::new(
            (from..=to).map(|i| Ok(Value::from(i))),
        ))))
    }
}

/// Sum of the amounts of the bound customer's orders.
struct OrderTotal {
    store: InMemoryStore,
}

impl Operation for OrderTotal {
    fn set_parameter(&mut self, _name: &str, _value: Value) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, ctx: &OperationContext<'_>) -> Result<Option<OperationOutput>> {
        let customer = ctx
            .binding_entity()
            .ok_or_else(|| Error::processor("OrderTotal must be bound to a single customer"))?;
        let address = EntityAddress::of_entity(ctx.edm(), customer)?;
        let total: Decimal = self
            .store
            .linked(&address, "Orders")?
            .iter()
            .filter_map(|order| order.property("Amount")?.as_primitive()?.to_decimal())
            .sum();
        Ok(Some(OperationOutput::Value(Value::from(total))))
    }
}

/// Sets the bound customer's name through its data source.
#[derive(Default)]
struct Rename {
    name: Option<String>,
}

impl Operation for Rename {
    fn set_parameter(&mut self, name: &str, value: Value) -> Result<()> {
        if name == "name" {
            self.name = text(&value);
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &OperationContext<'_>) -> Result<Option<OperationOutput>> {
        let customer = ctx
            .binding_entity()
            .ok_or_else(|| Error::processor("Rename must be bound to a single customer"))?;
        let name = self
            .name
            .clone()
            .ok_or_else(|| Error::bad_request_at("name is required", "name"))?;
        let path = ctx
            .request
            .uri()
            .resource_path()
            .map(|p| p.parent())
            .ok_or_else(|| Error::processor("Rename needs a binding path"))?;
        let uri = ODataUri {
            service_root: ctx.request.service_root().to_string(),
            kind: UriKind::Resource(path),
            options: Default::default(),
        };

        let mut renamed = customer.clone();
        renamed.set_property("Name", name);
        let data_source = ctx.providers.data_source_for(ctx.request, &customer.type_name)?;
        let updated = data_source.update(&uri, &renamed, ctx.edm())?;
        Ok(Some(OperationOutput::Entity(updated)))
    }
}

/// Restores the initial data.
struct Reset {
    store: InMemoryStore,
    seed: Option<serde_json::Value>,
}

impl Operation for Reset {
    fn set_parameter(&mut self, _name: &str, _value: Value) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, _ctx: &OperationContext<'_>) -> Result<Option<OperationOutput>> {
        self.store.clear()?;
        if let Some(seed) = &self.seed {
            let loaded = self.store.load_seed(seed)?;
            tracing::info!(entities = loaded, "Store reset to seed data");
        }
        Ok(None)
    }
}
