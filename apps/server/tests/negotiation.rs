//! Renderer selection from `Accept`, `$format` and `Content-Type`

mod support;

use axum::http::{Method, StatusCode};
use support::{assert_status, TestApp};

#[tokio::test]
async fn entities_default_to_json() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    for accept in [None, Some("*/*")] {
        let headers: Vec<(&str, &str)> = accept.map(|a| ("accept", a)).into_iter().collect();
        let response = app.get_with("/odata/Customers(1)", &headers).await?;
        assert_status(&response, StatusCode::OK, "default format");
        assert_eq!(
            response.header("content-type"),
            Some("application/json;odata.metadata=minimal"),
            "accept {accept:?}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn atom_is_chosen_by_accept() -> anyhow::Result<()> {
    let app = TestApp::new()?;

    let entry = app
        .get_with("/odata/Customers(1)", &[("accept", "application/atom+xml")])
        .await?;
    assert_status(&entry, StatusCode::OK, "atom entry");
    assert_eq!(entry.header("content-type"), Some("application/atom+xml;type=entry"));
    assert!(entry.text().contains("<entry"));

    let feed = app
        .get_with("/odata/Customers", &[("accept", "application/atom+xml")])
        .await?;
    assert_eq!(feed.header("content-type"), Some("application/atom+xml;type=feed"));
    assert!(feed.text().contains("<feed"));
    Ok(())
}

#[tokio::test]
async fn format_option_outranks_accept() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app
        .get_with("/odata/Customers(1)?$format=json", &[("accept", "application/atom+xml")])
        .await?;
    assert_eq!(
        response.header("content-type"),
        Some("application/json;odata.metadata=minimal")
    );

    let response = app
        .get_with("/odata/Customers(1)?$format=atom", &[("accept", "application/json")])
        .await?;
    assert_eq!(response.header("content-type"), Some("application/atom+xml;type=entry"));
    Ok(())
}

#[tokio::test]
async fn earlier_accept_entries_score_higher() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app
        .get_with(
            "/odata/Customers(1)",
            &[("accept", "application/atom+xml, application/json")],
        )
        .await?;
    assert_eq!(response.header("content-type"), Some("application/atom+xml;type=entry"));

    let response = app
        .get_with(
            "/odata/Customers(1)",
            &[("accept", "application/atom+xml;q=0.5, application/json")],
        )
        .await?;
    assert_eq!(
        response.header("content-type"),
        Some("application/json;odata.metadata=minimal")
    );
    Ok(())
}

#[tokio::test]
async fn service_document_prefers_xml_on_a_tie() -> anyhow::Result<()> {
    let app = TestApp::new()?;

    for path in ["/odata", "/odata/"] {
        let response = app.get(path).await?;
        assert_status(&response, StatusCode::OK, "service document");
        assert_eq!(response.header("content-type"), Some("application/atomsvc+xml"), "{path}");
    }

    let wildcard = app.get_with("/odata/", &[("accept", "*/*")]).await?;
    assert_eq!(wildcard.header("content-type"), Some("application/atomsvc+xml"));

    let json = app.get_with("/odata/", &[("accept", "application/json")]).await?;
    assert_eq!(
        json.header("content-type"),
        Some("application/json;odata.metadata=minimal")
    );
    let doc = json.json()?;
    let names: Vec<&str> = doc["value"]
        .as_array()
        .map(|v| v.iter().filter_map(|s| s["name"].as_str()).collect())
        .unwrap_or_default();
    assert!(names.contains(&"Customers"));
    assert!(names.contains(&"Orders"));
    Ok(())
}

#[tokio::test]
async fn metadata_is_always_csdl() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app
        .get_with("/odata/$metadata", &[("accept", "application/json")])
        .await?;
    assert_status(&response, StatusCode::OK, "metadata");
    assert_eq!(response.header("content-type"), Some("application/xml"));
    assert!(response.text().contains("edmx:Edmx"));
    assert!(response.text().contains("Customers"));
    Ok(())
}

#[tokio::test]
async fn unacceptable_media_type_is_rejected() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app
        .get_with("/odata/Customers(1)", &[("accept", "text/csv")])
        .await?;
    assert_status(&response, StatusCode::NOT_ACCEPTABLE, "csv");
    assert!(response.text().contains("ODATA_NOT_ACCEPTABLE"));
    Ok(())
}

#[tokio::test]
async fn errors_follow_the_requested_format() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app
        .get_with("/odata/Customers(42)", &[("accept", "application/xml")])
        .await?;
    assert_status(&response, StatusCode::NOT_FOUND, "xml error");
    assert_eq!(response.header("content-type"), Some("application/xml"));
    assert!(response.text().contains("ODATA_ENTITY_NOT_FOUND"));
    Ok(())
}

#[tokio::test]
async fn atom_entry_round_trips_through_put() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let entry = app
        .get_with("/odata/Customers(2)", &[("accept", "application/atom+xml")])
        .await?;
    assert_status(&entry, StatusCode::OK, "atom read");

    let response = app
        .request(
            Method::PUT,
            "/odata/Customers(2)",
            Some(entry.body.clone()),
            &[("content-type", "application/atom+xml;type=entry")],
        )
        .await?;
    assert_status(&response, StatusCode::OK, "atom put");
    assert_eq!(response.header("content-type"), Some("application/atom+xml;type=entry"));

    let read = app.get("/odata/Customers(2)").await?.json()?;
    assert_eq!(read["Id"], 2);
    assert_eq!(read["Name"], "Bob");
    Ok(())
}

#[tokio::test]
async fn json_entity_round_trips_through_put() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let before = app.get("/odata/Customers(1)").await?;
    let response = app
        .request(
            Method::PUT,
            "/odata/Customers(1)",
            Some(before.body.clone()),
            &[("content-type", "application/json")],
        )
        .await?;
    assert_status(&response, StatusCode::OK, "json put");

    let after = app.get("/odata/Customers(1)").await?;
    assert_eq!(before.json()?, after.json()?);
    Ok(())
}
