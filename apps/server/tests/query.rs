//! Read requests over HTTP: resource paths, query options and result shapes

mod support;

use axum::http::StatusCode;
use support::{assert_status, TestApp};

#[tokio::test]
async fn health_check_is_outside_the_service() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app.get("/health").await?;
    assert_status(&response, StatusCode::OK, "health");
    assert_eq!(response.json()?["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn entity_set_lists_every_entity() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app.get("/odata/Customers").await?;
    assert_status(&response, StatusCode::OK, "read set");
    assert_eq!(
        response.header("content-type"),
        Some("application/json;odata.metadata=minimal")
    );
    assert_eq!(response.header("odata-version"), Some("4.0"));

    let doc = response.json()?;
    assert_eq!(doc["@odata.context"], "http://example.org/odata/$metadata#Customers");
    let names: Vec<&str> = doc["value"]
        .as_array()
        .map(|v| v.iter().filter_map(|c| c["Name"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["Ann", "Bob"]);
    Ok(())
}

#[tokio::test]
async fn single_entity_is_unwrapped() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app.get("/odata/Customers(1)").await?;
    assert_status(&response, StatusCode::OK, "read entity");

    let doc = response.json()?;
    assert_eq!(
        doc["@odata.context"],
        "http://example.org/odata/$metadata#Customers/$entity"
    );
    assert_eq!(doc["Id"], 1);
    assert_eq!(doc["Name"], "Ann");
    assert_eq!(doc["Address"]["City"], "Oslo");
    Ok(())
}

#[tokio::test]
async fn missing_key_is_not_found() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app.get("/odata/Customers(42)").await?;
    assert_status(&response, StatusCode::NOT_FOUND, "missing entity");
    assert_eq!(response.json()?["error"]["code"], "ODATA_ENTITY_NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn navigation_results_follow_the_target_shape() -> anyhow::Result<()> {
    let app = TestApp::new()?;

    // Two linked orders stay a collection
    let orders = app.get("/odata/Customers(1)/Orders").await?;
    assert_status(&orders, StatusCode::OK, "collection navigation");
    assert_eq!(orders.json()?["value"].as_array().map(Vec::len), Some(2));

    // A single-valued navigation unwraps its one element
    let owner = app.get("/odata/Orders(20)/Customer").await?;
    assert_status(&owner, StatusCode::OK, "single navigation");
    assert_eq!(owner.json()?["Name"], "Bob");

    // A key that is not among the linked entities matches nothing
    let foreign = app.get("/odata/Customers(1)/Orders(20)").await?;
    assert_status(&foreign, StatusCode::NOT_FOUND, "unlinked key");
    Ok(())
}

#[tokio::test]
async fn bad_uri_is_a_client_error() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app.get("/odata/Nowhere").await?;
    assert_status(&response, StatusCode::BAD_REQUEST, "unknown set");
    assert_eq!(response.json()?["error"]["code"], "ODATA_URI_PARSE");
    Ok(())
}

#[tokio::test]
async fn paging_and_ordering_options_apply() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app
        .get("/odata/Customers?$orderby=Name%20desc&$top=1&$count=true")
        .await?;
    assert_status(&response, StatusCode::OK, "ordered page");

    let doc = response.json()?;
    assert_eq!(doc["@odata.count"], 2);
    assert_eq!(doc["value"].as_array().map(Vec::len), Some(1));
    assert_eq!(doc["value"][0]["Name"], "Bob");
    Ok(())
}

#[tokio::test]
async fn unsupported_query_option_is_not_implemented() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app.get("/odata/Customers?$filter=Id%20eq%201").await?;
    assert_status(&response, StatusCode::NOT_IMPLEMENTED, "filter");
    assert_eq!(response.json()?["error"]["code"], "ODATA_NOT_IMPLEMENTED");
    Ok(())
}

#[tokio::test]
async fn count_and_value_render_as_plain_text() -> anyhow::Result<()> {
    let app = TestApp::new()?;

    let count = app.get("/odata/Customers/$count").await?;
    assert_status(&count, StatusCode::OK, "count");
    assert_eq!(count.header("content-type"), Some("text/plain;charset=utf-8"));
    assert_eq!(count.text(), "2");

    let name = app.get("/odata/Customers(2)/Name/$value").await?;
    assert_status(&name, StatusCode::OK, "raw value");
    assert_eq!(name.text(), "Bob");

    let note = app.get("/odata/Orders(11)/Note/$value").await?;
    assert_status(&note, StatusCode::NO_CONTENT, "null raw value");
    assert!(note.body.is_empty());
    Ok(())
}

#[tokio::test]
async fn property_renders_with_its_type_context() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app.get("/odata/Customers(1)/Name").await?;
    assert_status(&response, StatusCode::OK, "property");

    let doc = response.json()?;
    assert_eq!(doc["@odata.context"], "http://example.org/odata/$metadata#Edm.String");
    assert_eq!(doc["value"], "Ann");
    Ok(())
}

#[tokio::test]
async fn references_render_ids_only() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app.get("/odata/Customers(2)/Orders/$ref").await?;
    assert_status(&response, StatusCode::OK, "refs");

    let doc = response.json()?;
    assert_eq!(
        doc["@odata.context"],
        "http://example.org/odata/$metadata#Collection($ref)"
    );
    assert_eq!(doc["value"][0]["@odata.id"], "http://example.org/odata/Orders(20)");
    assert!(doc["value"][0].get("Amount").is_none());
    Ok(())
}

#[tokio::test]
async fn forwarded_headers_shape_the_service_root() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app
        .get_with(
            "/odata/Customers(1)",
            &[("x-forwarded-proto", "https"), ("x-forwarded-host", "api.example.com")],
        )
        .await?;
    assert_eq!(
        response.json()?["@odata.context"],
        "https://api.example.com/odata/$metadata#Customers/$entity"
    );
    Ok(())
}

#[tokio::test]
async fn collection_property_renders_as_a_collection() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app.get("/odata/Customers(1)/Emails").await?;
    assert_status(&response, StatusCode::OK, "collection property");

    let doc = response.json()?;
    assert_eq!(
        doc["@odata.context"],
        "http://example.org/odata/$metadata#Collection(Edm.String)"
    );
    assert_eq!(doc["value"], serde_json::json!(["ann@example.com"]));

    // Bob has no addresses on file
    let empty = app.get("/odata/Customers(2)/Emails").await?;
    assert_status(&empty, StatusCode::OK, "absent collection property");
    assert_eq!(empty.json()?["value"], serde_json::json!([]));
    Ok(())
}
