//! Gate and Route Integration Tests
//!
//! Drives the full router (gates, fallback, layers) with in-process requests.

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use axum_extra::extract::cookie::{Cookie, SignedCookieJar};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dbagent::auth::session::generate_token;
use dbagent::{Identity, Server, ServerConfig};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const SHELL: &str = "<!doctype html><html><body>live shell</body></html>";

/// Server over a temp dir holding the password store, logs and a live
/// `public/` tree. Users: `admin` / `admin-pass`, `bot` / `secret`.
async fn create_test_server(devel: bool, debug: bool) -> (Server, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path();

    let public = root.join("lib").join("public");
    std::fs::create_dir_all(&public).unwrap();
    std::fs::write(public.join("index.html"), SHELL).unwrap();
    std::fs::write(root.join("secret.txt"), "top secret").unwrap();

    let config = ServerConfig {
        devel,
        debug,
        lib_dir: root.join("lib"),
        store_dir: root.to_path_buf(),
        password_path: root.join("db").join("users.db"),
        access_log_path: root.join("access.log"),
        ..ServerConfig::default()
    };

    let server = Server::new(config).await.expect("Failed to build server");
    server.state().users.create("admin", "admin-pass").unwrap();
    server.state().users.create("bot", "secret").unwrap();

    (server, temp_dir)
}

async fn create_test_app(devel: bool, debug: bool) -> (Router, TempDir) {
    let (server, temp_dir) = create_test_server(devel, debug).await;
    (server.router(), temp_dir)
}

/// Signed cookie for a session of `username` that ended a minute ago
async fn expired_session_cookie(server: &Server, username: &str) -> String {
    let state = server.state();
    let token = generate_token();
    state
        .sessions
        .set(&token, Identity::new(username), chrono::Duration::seconds(-60))
        .await;

    let jar = SignedCookieJar::new(state.cookie_key.clone()).add(Cookie::new("session", token));
    let response = jar.into_response();
    session_cookie(&response)
}

fn basic(pair: &str) -> String {
    format!("Basic {}", STANDARD.encode(pair))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// `name=value` part of the session Set-Cookie
fn session_cookie(response: &Response) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("No session cookie")
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let response = send(
        app,
        post_json(
            "/api/v2/user/login",
            json!({ "username": username, "password": password }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    session_cookie(&response)
}

#[tokio::test]
async fn test_login_then_list_users() {
    let (app, _temp) = create_test_app(false, false).await;

    let response = send(
        &app,
        post_json(
            "/api/v2/user/login",
            json!({ "username": "admin", "password": "admin-pass" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with("session="));
    assert!(set_cookie.contains("HttpOnly"));
    let cookie = session_cookie(&response);

    let body = json_body(response).await;
    assert_eq!(body["error"], false);
    assert_eq!(body["result"]["username"], "admin");

    let mut req = post_json("/api/v2/user/list", json!({}));
    req.headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["error"], false);
    assert_eq!(
        body["result"],
        json!([{ "username": "admin" }, { "username": "bot" }])
    );
}

#[tokio::test]
async fn test_universal_accepts_session() {
    let (app, _temp) = create_test_app(false, false).await;
    let cookie = login(&app, "admin", "admin-pass").await;

    let req = Request::builder()
        .uri("/api/v1/status/hello")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["error"], false);
    assert_eq!(body["message"], "hello");
    assert_eq!(body["result"]["identity"], "admin");
}

#[tokio::test]
async fn test_universal_rejects_wrong_basic_password() {
    let (app, _temp) = create_test_app(false, false).await;

    let req = Request::builder()
        .uri("/api/v1/status/hello")
        .header(header::AUTHORIZATION, basic("bot:wrongpass"))
        .body(Body::empty())
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(body["error"], true);
    assert_eq!(body["message"], "wrong basic authorization");
}

#[tokio::test]
async fn test_universal_accepts_basic() {
    let (app, _temp) = create_test_app(false, false).await;

    let req = Request::builder()
        .uri("/api/v1/status/hello")
        .header(header::AUTHORIZATION, basic("bot:secret"))
        .body(Body::empty())
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Basic success never creates a session
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    let body = json_body(response).await;
    assert_eq!(body["result"]["identity"], "bot");
}

#[tokio::test]
async fn test_universal_session_wins_over_bad_header() {
    let (app, _temp) = create_test_app(false, false).await;
    let cookie = login(&app, "admin", "admin-pass").await;

    let req = Request::builder()
        .uri("/api/v1/status/hello")
        .header(header::COOKIE, cookie)
        .header(header::AUTHORIZATION, "Basic %%%not-base64")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["result"]["identity"], "admin");
}

#[tokio::test]
async fn test_session_only_rejects_basic() {
    let (app, _temp) = create_test_app(false, false).await;

    let mut req = post_json("/api/v2/user/list", json!({}));
    req.headers_mut()
        .insert(header::AUTHORIZATION, basic("bot:secret").parse().unwrap());
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(body["error"], true);
    assert_eq!(body["message"], "wrong session authentication");
}

#[tokio::test]
async fn test_forged_cookie_rejected() {
    let (app, _temp) = create_test_app(false, false).await;

    let mut req = post_json("/api/v2/user/list", json!({}));
    req.headers_mut().insert(
        header::COOKIE,
        "session=deadbeefdeadbeefdeadbeefdeadbeef".parse().unwrap(),
    );
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_failures() {
    let (app, _temp) = create_test_app(false, false).await;

    let response = send(
        &app,
        post_json(
            "/api/v2/user/login",
            json!({ "username": "admin", "password": "nope" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["message"], "wrong login or password");

    let response = send(
        &app,
        post_json(
            "/api/v2/user/login",
            json!({ "username": "ghost", "password": "nope" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v2/user/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{broken"))
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], true);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let (app, _temp) = create_test_app(false, false).await;
    let cookie = login(&app, "admin", "admin-pass").await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v2/user/logout")
        .header(header::COOKIE, cookie.clone())
        .body(Body::empty())
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut req = post_json("/api/v2/user/list", json!({}));
    req.headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_user_management() {
    let (app, _temp) = create_test_app(false, false).await;
    let cookie = login(&app, "admin", "admin-pass").await;

    let with_cookie = |mut req: Request<Body>| {
        req.headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        req
    };

    let response = send(
        &app,
        with_cookie(post_json(
            "/api/v2/user/create",
            json!({ "username": "carol", "password": "pw-1" }),
        )),
    )
    .await;
    assert_eq!(json_body(response).await["error"], false);

    // duplicate is an in-band error
    let response = send(
        &app,
        with_cookie(post_json(
            "/api/v2/user/create",
            json!({ "username": "carol", "password": "pw-2" }),
        )),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["error"], true);

    let response = send(
        &app,
        with_cookie(post_json(
            "/api/v2/user/update",
            json!({ "username": "carol", "password": "pw-3" }),
        )),
    )
    .await;
    assert_eq!(json_body(response).await["error"], false);
    login(&app, "carol", "pw-3").await;

    let response = send(
        &app,
        with_cookie(post_json("/api/v2/user/delete", json!({ "username": "admin" }))),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["error"], true);
    assert_eq!(body["message"], "unable delete own user");

    let response = send(
        &app,
        with_cookie(post_json("/api/v2/user/delete", json!({ "username": "carol" }))),
    )
    .await;
    assert_eq!(json_body(response).await["error"], false);

    let response = send(
        &app,
        with_cookie(post_json("/api/v2/user/delete", json!({ "username": "carol" }))),
    )
    .await;
    assert_eq!(json_body(response).await["error"], true);
}

#[tokio::test]
async fn test_unknown_page_serves_shell_in_devel() {
    let (app, _temp) = create_test_app(true, false).await;

    let req = Request::builder()
        .uri("/unknown/page")
        .header(header::ACCEPT, "text/html")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], SHELL.as_bytes());
}

#[tokio::test]
async fn test_unknown_path_json_caller_gets_wrong_uri() {
    let (app, _temp) = create_test_app(false, false).await;

    let req = Request::builder()
        .uri("/unknown/page")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], br#"{"error":true,"message":"wrong uri"}"#);
}

#[tokio::test]
async fn test_traversal_looks_like_a_miss() {
    let (app, _temp) = create_test_app(true, false).await;

    let req = Request::builder()
        .uri("/js/../../secret.txt")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], SHELL.as_bytes());
}

#[tokio::test]
async fn test_root_document_in_devel() {
    let (app, _temp) = create_test_app(true, false).await;

    let response = send(
        &app,
        Request::builder().uri("/").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], SHELL.as_bytes());
}

#[tokio::test]
async fn test_debug_mode_leaves_responses_untouched() {
    let (app, temp) = create_test_app(false, true).await;
    let cookie = login(&app, "admin", "admin-pass").await;

    let mut req = post_json("/api/v2/user/list", json!({ "ignored": [1, 2, 3] }));
    req.headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["result"][0]["username"], "admin");

    let access_log = std::fs::read_to_string(temp.path().join("access.log")).unwrap();
    assert!(access_log.contains("POST /api/v2/user/list HTTP/1.1 200"));
}

#[tokio::test]
async fn test_expired_session_is_no_session() {
    let (server, _temp) = create_test_server(false, false).await;
    let cookie = expired_session_cookie(&server, "admin").await;
    let app = server.router();

    let mut req = post_json("/api/v2/user/list", json!({}));
    req.headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(body["error"], true);
    assert_eq!(body["message"], "wrong session authentication");
}

#[tokio::test]
async fn test_expired_session_falls_through_to_basic() {
    let (server, _temp) = create_test_server(false, false).await;
    let cookie = expired_session_cookie(&server, "admin").await;
    let app = server.router();

    let req = Request::builder()
        .uri("/api/v1/status/hello")
        .header(header::COOKIE, cookie)
        .header(header::AUTHORIZATION, basic("bot:secret"))
        .body(Body::empty())
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["result"]["identity"], "bot");
}

#[tokio::test]
async fn test_wrong_method_gets_wrong_uri() {
    let (app, _temp) = create_test_app(false, false).await;

    let response = send(&app, post_json("/", json!({}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], br#"{"error":true,"message":"wrong uri"}"#);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/status/hello")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, basic("bot:secret"))
        .body(Body::empty())
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body, json!({ "error": true, "message": "wrong uri" }));
}

#[tokio::test]
async fn test_non_utf8_authorization_is_named() {
    let (app, _temp) = create_test_app(false, false).await;

    let req = Request::builder()
        .uri("/api/v1/status/hello")
        .header(
            header::AUTHORIZATION,
            HeaderValue::from_bytes(b"Basic \xff\xfe").unwrap(),
        )
        .body(Body::empty())
        .unwrap();
    let response = send(&app, req).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(
        body["message"],
        "parse auth header error: authorization header is not valid utf-8"
    );
}
