//! `$batch` requests: query parts, changesets and response framing

mod support;

use axum::http::{Method, StatusCode};
use support::{assert_status, batch_body, changeset_part, http_part, TestApp, TestResponse};

async fn post_batch(app: &TestApp, body: String) -> anyhow::Result<TestResponse> {
    app.request(
        Method::POST,
        "/odata/$batch",
        Some(body.into()),
        &[("content-type", "multipart/mixed; boundary=batch_test")],
    )
    .await
}

#[tokio::test]
async fn mixed_batch_answers_every_part_in_order() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let body = batch_body(
        "batch_test",
        &[
            http_part(None, "GET Customers(1) HTTP/1.1", ""),
            changeset_part(
                "changeset_one",
                &[
                    http_part(Some("1"), "POST Customers HTTP/1.1", r#"{"Id":3,"Name":"Cid"}"#),
                    http_part(Some("2"), "DELETE Orders(20) HTTP/1.1", ""),
                ],
            ),
            http_part(None, "GET Customers(42) HTTP/1.1", ""),
        ],
    );

    let response = post_batch(&app, body).await?;
    assert_status(&response, StatusCode::OK, "batch");
    assert!(response
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("multipart/mixed; boundary=batch_")));

    let text = response.text();
    let ok = text.find("HTTP/1.1 200 OK").unwrap_or(usize::MAX);
    let created = text.find("HTTP/1.1 201 Created").unwrap_or(usize::MAX);
    let deleted = text.find("HTTP/1.1 204 No Content").unwrap_or(usize::MAX);
    let missing = text.find("HTTP/1.1 404 Not Found").unwrap_or(usize::MAX);
    assert!(ok < created && created < deleted && deleted < missing, "{text}");

    assert!(text.contains("boundary=changeset_one"));
    assert!(text.contains("--changeset_one--"));
    assert!(text.contains("Content-ID: 1"));
    assert!(text.contains("location: http://example.org/odata/Customers(3)"));

    // The changeset committed
    assert_status(&app.get("/odata/Customers(3)").await?, StatusCode::OK, "created");
    assert_status(&app.get("/odata/Orders(20)").await?, StatusCode::NOT_FOUND, "deleted");
    Ok(())
}

#[tokio::test]
async fn failed_changeset_rolls_back_every_item() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let body = batch_body(
        "batch_test",
        &[changeset_part(
            "changeset_fail",
            &[
                http_part(Some("1"), "POST Customers HTTP/1.1", r#"{"Id":3,"Name":"Cid"}"#),
                // Duplicate key
                http_part(Some("2"), "POST Customers HTTP/1.1", r#"{"Id":1,"Name":"Ann"}"#),
                http_part(Some("3"), "DELETE Orders(20) HTTP/1.1", ""),
            ],
        )],
    );

    let response = post_batch(&app, body).await?;
    assert_status(&response, StatusCode::OK, "batch");

    let text = response.text();
    assert_eq!(text.matches("HTTP/1.1 400 Bad Request").count(), 3, "{text}");
    assert_eq!(text.matches("changeset rolled back").count(), 2, "{text}");
    assert!(!text.contains("201 Created"));

    // The second part carries the failure itself
    let second = text
        .split("Content-ID: 2")
        .nth(1)
        .and_then(|rest| rest.split("Content-ID: 3").next())
        .unwrap_or_default();
    assert!(second.contains("already exists"), "{second}");
    assert!(!second.contains("changeset rolled back"), "{second}");

    // Nothing from the changeset is visible
    assert_status(&app.get("/odata/Customers(3)").await?, StatusCode::NOT_FOUND, "not created");
    assert_status(&app.get("/odata/Orders(20)").await?, StatusCode::OK, "not deleted");
    Ok(())
}

#[tokio::test]
async fn failing_query_part_does_not_affect_others() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let body = batch_body(
        "batch_test",
        &[
            http_part(None, "GET Nowhere HTTP/1.1", ""),
            http_part(None, "GET Customers/$count HTTP/1.1", ""),
        ],
    );

    let response = post_batch(&app, body).await?;
    assert_status(&response, StatusCode::OK, "batch");
    let text = response.text();
    assert!(text.contains("HTTP/1.1 400 Bad Request"));
    assert!(text.contains("HTTP/1.1 200 OK"));
    assert!(text.contains("text/plain;charset=utf-8"));
    Ok(())
}

#[tokio::test]
async fn writes_outside_a_changeset_are_refused() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let body = batch_body(
        "batch_test",
        &[http_part(None, "DELETE Orders(20) HTTP/1.1", "")],
    );

    let response = post_batch(&app, body).await?;
    assert_status(&response, StatusCode::OK, "batch");
    assert!(response.text().contains("HTTP/1.1 400 Bad Request"));
    assert_status(&app.get("/odata/Orders(20)").await?, StatusCode::OK, "still there");
    Ok(())
}

#[tokio::test]
async fn part_limit_rejects_the_whole_batch() -> anyhow::Result<()> {
    let app = TestApp::new_with_config(|config| config.batch.max_parts = 1)?;
    let body = batch_body(
        "batch_test",
        &[
            http_part(None, "GET Customers(1) HTTP/1.1", ""),
            http_part(None, "GET Customers(2) HTTP/1.1", ""),
        ],
    );

    let response = post_batch(&app, body).await?;
    assert_status(&response, StatusCode::BAD_REQUEST, "too many parts");
    assert!(response
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("multipart/mixed; boundary=batch_")));

    let text = response.text();
    assert!(text.contains("HTTP/1.1 400 Bad Request"), "{text}");
    assert!(text.contains("at most 1 are allowed"), "{text}");
    Ok(())
}

#[tokio::test]
async fn malformed_batch_body_is_an_inline_exception() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = post_batch(&app, "--batch_test\r\nnot closed".to_string()).await?;
    assert_status(&response, StatusCode::BAD_REQUEST, "unterminated batch");

    let text = response.text();
    assert!(text.contains("HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain"), "{text}");
    assert!(!text.contains("\"error\""), "{text}");
    Ok(())
}

#[tokio::test]
async fn request_content_length_can_be_reused_for_parts() -> anyhow::Result<()> {
    let app = TestApp::new_with_config(|config| config.batch.reuse_request_content_length = true)?;
    let body = batch_body("batch_test", &[http_part(None, "GET Customers/$count HTTP/1.1", "")]);
    let length = body.len().to_string();

    let response = app
        .request(
            Method::POST,
            "/odata/$batch",
            Some(body.into()),
            &[
                ("content-type", "multipart/mixed; boundary=batch_test"),
                ("content-length", length.as_str()),
            ],
        )
        .await?;
    assert_status(&response, StatusCode::OK, "batch");
    assert!(response.text().contains(&format!("Content-Length: {length}")));
    Ok(())
}

#[tokio::test]
async fn batch_only_accepts_post() -> anyhow::Result<()> {
    let app = TestApp::new()?;
    let response = app.get("/odata/$batch").await?;
    assert_status(&response, StatusCode::METHOD_NOT_ALLOWED, "GET $batch");
    Ok(())
}
