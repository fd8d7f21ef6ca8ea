//! HTTP transport tests against a local mock server: content negotiation,
//! header merging, error mapping, and cookie persistence.

use std::collections::HashMap;

use httpmock::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};

use appwrite_client::{Client, Error, Method, Params, RequestError};

fn client_for(server: &MockServer) -> Client {
    Client::builder()
        .endpoint(server.base_url())
        .project("p1")
        .build()
        .unwrap()
}

#[tokio::test]
async fn get_serializes_params_into_the_query_string() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/account/logs")
            .query_param("limit", "25")
            .query_param("queries[]", "offset(0)")
            .query_param("queries[]", "orderDesc($id)");
        then.status(200).json_body(json!({ "total": 0, "logs": [] }));
    });

    let params = Params::new()
        .with("limit", 25i64)
        .with("missing", Value::Null)
        .with(
            "queries",
            vec!["offset(0)".to_string(), "orderDesc($id)".to_string()],
        );
    let body: Value = client_for(&server)
        .call(Method::GET, "/account/logs", &HashMap::new(), params)
        .await
        .unwrap();

    mock.assert();
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn json_body_drops_null_parameters() {
    let server = MockServer::start();
    // Exact body match: a surviving `prefs` key would fail it.
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/account")
            .header("content-type", "application/json")
            .json_body(json!({ "userId": "unique()", "email": "a@b.c" }));
        then.status(201)
            .json_body(json!({ "$id": "u1", "email": "a@b.c" }));
    });

    #[derive(Debug, Deserialize)]
    struct User {
        #[serde(rename = "$id")]
        id: String,
        email: String,
    }

    let params = Params::new()
        .with("userId", "unique()")
        .with("email", "a@b.c")
        .with("prefs", Value::Null);
    let user: User = client_for(&server)
        .call(Method::POST, "/account", &HashMap::new(), params)
        .await
        .unwrap();

    mock.assert();
    assert_eq!(user.id, "u1");
    assert_eq!(user.email, "a@b.c");
}

#[tokio::test]
async fn default_headers_identify_the_sdk_and_project() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/account")
            .header("x-appwrite-project", "p1")
            .header("x-sdk-language", "rust")
            .header_exists("x-appwrite-response-format");
        then.status(200).json_body(json!({ "$id": "u1" }));
    });

    let _: Value = client_for(&server)
        .call(Method::GET, "/account", &HashMap::new(), Params::new())
        .await
        .unwrap();

    mock.assert();
}

#[tokio::test]
async fn per_call_headers_override_defaults() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/locale")
            .header("x-appwrite-project", "p1")
            .header("x-appwrite-locale", "fr");
        then.status(200).json_body(json!({}));
    });

    let client = client_for(&server);
    client.set_locale("en");

    // The per-call value wins over the session default, key-insensitively.
    let headers = HashMap::from([("X-Appwrite-Locale".to_string(), "fr".to_string())]);
    let _: Value = client
        .call(Method::GET, "/locale", &headers, Params::new())
        .await
        .unwrap();

    mock.assert();
}

#[tokio::test]
async fn server_error_bodies_map_to_typed_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/account");
        then.status(401).json_body(json!({
            "message": "User (role: guests) missing scope (account)",
            "code": 401,
            "type": "general_unauthorized_scope",
        }));
    });

    let err = client_for(&server)
        .call::<Value>(Method::GET, "/account", &HashMap::new(), Params::new())
        .await
        .unwrap_err();

    match err {
        Error::Request(RequestError::Server {
            status,
            error_type,
            message,
            response,
        }) => {
            assert_eq!(status.as_u16(), 401);
            assert_eq!(error_type.as_deref(), Some("general_unauthorized_scope"));
            assert_eq!(message, "User (role: guests) missing scope (account)");
            assert!(response.contains("general_unauthorized_scope"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn non_json_error_bodies_keep_the_raw_text() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/account");
        then.status(502).body("<html>bad gateway</html>");
    });

    let err = client_for(&server)
        .call::<Value>(Method::GET, "/account", &HashMap::new(), Params::new())
        .await
        .unwrap_err();

    match err {
        Error::Request(RequestError::Server {
            status,
            error_type,
            message,
            ..
        }) => {
            assert_eq!(status.as_u16(), 502);
            assert_eq!(error_type, None);
            assert_eq!(message, "<html>bad gateway</html>");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn undecodable_success_bodies_keep_status_and_body() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/account");
        then.status(200).body("not json at all");
    });

    #[derive(Debug, Deserialize)]
    struct User {
        #[expect(dead_code, reason = "shape only")]
        email: String,
    }

    let err = client_for(&server)
        .call::<User>(Method::GET, "/account", &HashMap::new(), Params::new())
        .await
        .unwrap_err();

    match err {
        Error::Request(RequestError::Decode {
            status, response, ..
        }) => {
            assert_eq!(status.as_u16(), 200);
            assert_eq!(response, "not json at all");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn empty_success_bodies_decode_as_null() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(DELETE).path("/account/sessions/current");
        then.status(204);
    });

    let body: Value = client_for(&server)
        .call(
            Method::DELETE,
            "/account/sessions/current",
            &HashMap::new(),
            Params::new(),
        )
        .await
        .unwrap();

    assert!(body.is_null());
}

#[tokio::test]
async fn call_bytes_returns_the_body_unchanged() {
    let server = MockServer::start();
    let payload: Vec<u8> = vec![0x89, 0x50, 0x4e, 0x47, 0x00, 0xff];
    server.mock(|when, then| {
        when.method(GET)
            .path("/storage/buckets/b/files/f/download");
        then.status(200)
            .header("content-type", "application/octet-stream")
            .body(payload.clone());
    });

    let bytes = client_for(&server)
        .call_bytes(
            Method::GET,
            "/storage/buckets/b/files/f/download",
            &HashMap::new(),
            Params::new(),
        )
        .await
        .unwrap();

    assert_eq!(bytes.as_ref(), payload.as_slice());
}

#[tokio::test]
async fn session_cookies_survive_client_reconstruction() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();
    let jar_path = dir.path().join("cookies.json");

    server.mock(|when, then| {
        when.method(POST).path("/account/sessions/email");
        then.status(201)
            .header("set-cookie", "a_session_p1=tok123; Path=/; HttpOnly")
            .json_body(json!({ "$id": "s1" }));
    });
    let authed = server.mock(|when, then| {
        when.method(GET)
            .path("/account")
            .header("cookie", "a_session_p1=tok123");
        then.status(200).json_body(json!({ "$id": "u1" }));
    });

    {
        let client = Client::builder()
            .endpoint(server.base_url())
            .project("p1")
            .cookie_store_path(&jar_path)
            .build()
            .unwrap();
        let _: Value = client
            .call(
                Method::POST,
                "/account/sessions/email",
                &HashMap::new(),
                Params::new().with("email", "a@b.c").with("password", "hunter2"),
            )
            .await
            .unwrap();
    }

    // A fresh client over the same jar file replays the session cookie.
    let client = Client::builder()
        .endpoint(server.base_url())
        .project("p1")
        .cookie_store_path(&jar_path)
        .build()
        .unwrap();
    let _: Value = client
        .call(Method::GET, "/account", &HashMap::new(), Params::new())
        .await
        .unwrap();

    authed.assert();
}
