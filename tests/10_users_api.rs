mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{harry, hermione, minerva, TestServer};
use crudsync::database::models::UserFields;

#[tokio::test]
async fn list_users_returns_all_rows() -> Result<()> {
    let server = TestServer::start(&[harry(), hermione()]).await?;
    let res = reqwest::get(server.url("/users")).await?;

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Users fetched successfully");
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Harry", "Hermione"]);
    Ok(())
}

#[tokio::test]
async fn empty_table_is_a_single_404() -> Result<()> {
    let server = TestServer::start(&[]).await?;
    let res = reqwest::get(server.url("/users")).await?;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await?;
    assert_eq!(body, json!({ "success": false, "message": "No users found", "data": [] }));
    Ok(())
}

#[tokio::test]
async fn married_users_includes_adults() -> Result<()> {
    let adult = UserFields::new("Hagrid", "hagrid@hogwarts", 60, false, "British");
    let server = TestServer::start(&[harry(), minerva(), adult]).await?;
    let res = reqwest::get(server.url("/married-users")).await?;

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Minerva", "Hagrid"]);
    Ok(())
}

#[tokio::test]
async fn married_users_empty_is_404() -> Result<()> {
    let server = TestServer::start(&[harry(), hermione()]).await?;
    let res = reqwest::get(server.url("/married-users")).await?;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["data"], json!([]));
    Ok(())
}

#[tokio::test]
async fn get_user_uses_path_id() -> Result<()> {
    let server = TestServer::start(&[harry(), hermione()]).await?;
    let res = reqwest::get(server.url("/user/2")).await?;

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["data"]["id"], 2);
    assert_eq!(body["data"]["name"], "Hermione");
    Ok(())
}

#[tokio::test]
async fn get_missing_user_is_404() -> Result<()> {
    let server = TestServer::start(&[harry()]).await?;
    let res = reqwest::get(server.url("/user/99")).await?;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
    assert!(body["data"].is_null());
    Ok(())
}

#[tokio::test]
async fn non_numeric_id_is_400() -> Result<()> {
    let server = TestServer::start(&[harry()]).await?;
    let res = reqwest::get(server.url("/user/abc")).await?;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["field_errors"]["id"].is_string());
    Ok(())
}

#[tokio::test]
async fn put_updates_all_fields() -> Result<()> {
    let server = TestServer::start(&[harry()]).await?;
    let client = reqwest::Client::new();
    let res = client
        .put(server.url("/user/1"))
        .json(&json!({
            "name": "Harry Potter",
            "email": "harry@hogwarts",
            "age": 38,
            "married": true,
            "nationality": "British"
        }))
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["message"], "User updated successfully");
    assert_eq!(body["data"]["age"], 38);

    let res = reqwest::get(server.url("/married-users")).await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn put_rejects_invalid_fields() -> Result<()> {
    let server = TestServer::start(&[harry()]).await?;
    let client = reqwest::Client::new();
    let res = client
        .put(server.url("/user/1"))
        .json(&json!({
            "name": "",
            "email": "not-an-email",
            "age": 12,
            "married": false,
            "nationality": "British"
        }))
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert!(body["field_errors"]["name"].is_string());
    assert!(body["field_errors"]["email"].is_string());
    Ok(())
}

#[tokio::test]
async fn put_missing_user_is_404() -> Result<()> {
    let server = TestServer::start(&[]).await?;
    let client = reqwest::Client::new();
    let res = client
        .put(server.url("/user/7"))
        .json(&json!({
            "name": "Ron",
            "email": "ron@hogwarts",
            "age": 11,
            "married": false,
            "nationality": "British"
        }))
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn put_duplicate_email_is_409() -> Result<()> {
    let server = TestServer::start(&[harry(), hermione()]).await?;
    let client = reqwest::Client::new();
    let res = client
        .put(server.url("/user/2"))
        .json(&json!({
            "name": "Hermione",
            "email": "harry@hogwarts",
            "age": 11,
            "married": false,
            "nationality": "British"
        }))
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "CONFLICT");
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_400() -> Result<()> {
    let server = TestServer::start(&[harry()]).await?;
    let client = reqwest::Client::new();
    let res = client
        .put(server.url("/user/1"))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "INVALID_JSON");
    Ok(())
}

#[tokio::test]
async fn unknown_route_gets_envelope() -> Result<()> {
    let server = TestServer::start(&[]).await?;
    let res = reqwest::get(server.url("/wizards")).await?;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Route /wizards not found");
    Ok(())
}
