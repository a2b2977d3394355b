//! Tests for the full dispatch pipeline
//!
//! # Test Coverage
//!
//! - Every parameter and body violation of a request lands in one 422 with its own `loc`
//! - Unknown routes, malformed bodies and oversized bodies map to 404/400
//! - Handler errors and panics become a generic 500 whose detail stays server-side
//! - Handlers can return a `Failure` to pick the problem type themselves
//! - Response schemas are enforced on 2xx replies
//! - Request ids are echoed, generated and logged
//!
//! # Test Strategy
//!
//! Everything goes through `TestClient`, so assertions are on the exact status, headers and
//! bytes a transport would send.

mod common;

use brrtdispatch::handler::handler_fn;
use brrtdispatch::params::{ParamType, ParameterDescriptor, ParameterSource};
use brrtdispatch::problem::Failure;
use brrtdispatch::request::RawRequest;
use brrtdispatch::router::RouteSchemas;
use brrtdispatch::{BoundaryValue, Response, ServerConfig, TestClient};
use common::{apps, logs};
use serde_json::json;
use std::sync::Arc;

fn descriptor(name: &str, source: ParameterSource, ty: ParamType) -> ParameterDescriptor {
    ParameterDescriptor::builder(name, source)
        .param_type(ty)
        .build()
        .unwrap()
}

fn order_client() -> TestClient {
    let app = apps::quiet();
    let handler = handler_fn(|ctx| Ok(BoundaryValue::Map(ctx.args.to_map())))
        .named("create_order")
        .param(descriptor("store_id", ParameterSource::Path, ParamType::Int))
        .param(descriptor("quantity", ParameterSource::Query, ParamType::Int))
        .param(
            ParameterDescriptor::builder("x-client", ParameterSource::Header)
                .build()
                .unwrap(),
        );
    app.route_with_schemas(
        "POST",
        "/stores/{store_id}/orders",
        Arc::new(handler),
        RouteSchemas::default().request(json!({
            "type": "object",
            "required": ["sku"],
            "properties": {"sku": {"type": "string", "minLength": 3}}
        })),
    )
    .unwrap();
    apps::client(app)
}

fn post(target: &str, body: serde_json::Value) -> RawRequest {
    RawRequest::new("POST", target)
        .with_header("Content-Type", "application/json")
        .with_body(serde_json::to_vec(&body).unwrap())
}

#[test]
fn test_valid_request_reaches_handler() {
    let client = order_client();
    let res = client
        .raw(
            post("/stores/7/orders?quantity=2", json!({"sku": "ABC-1"}))
                .with_header("X-Client", "web"),
        )
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(
        res.json().unwrap(),
        json!({"store_id": 7, "quantity": 2, "x-client": "web"})
    );
}

#[test]
fn test_all_violations_reported_in_one_422() {
    let client = order_client();
    let res = client
        .raw(post("/stores/7/orders?quantity=lots", json!({"sku": "A"})))
        .unwrap();
    assert_eq!(res.status(), 422);
    assert_eq!(res.header("content-type"), Some("application/problem+json"));

    let body = res.json().unwrap();
    assert_eq!(body["type"], "https://brrtrouter.dev/errors/validation-error");
    assert_eq!(body["title"], "Request Validation Failed");
    assert_eq!(body["status"], 422);

    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 2, "{body}");
    assert_eq!(errors[0]["loc"], json!(["query", "quantity"]));
    assert_eq!(errors[0]["type"], "int_parsing");
    assert_eq!(errors[0]["input"], "lots");
    assert_eq!(errors[1]["loc"], json!(["header", "x-client"]));
    assert_eq!(errors[1]["type"], "missing");
}

#[test]
fn test_body_schema_violations_join_parameter_errors() {
    let client = order_client();
    let res = client
        .raw(
            post("/stores/7/orders?quantity=1", json!({"sku": "A"}))
                .with_header("X-Client", "web"),
        )
        .unwrap();
    assert_eq!(res.status(), 422);
    let body = res.json().unwrap();
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["loc"], json!(["body", "sku"]));
    assert_eq!(errors[0]["type"], "string_too_short");
    assert_eq!(body["detail"], "1 validation error in request");
}

#[test]
fn test_three_errors_pluralized() {
    let client = order_client();
    let res = client
        .raw(post("/stores/x/orders?quantity=lots", json!({"sku": "A"})))
        .unwrap();
    let body = res.json().unwrap();
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 3);
    assert_eq!(errors[0]["loc"], json!(["path", "store_id"]));
    assert_eq!(body["detail"], "3 validation errors in request");
}

#[test]
fn test_unknown_route_is_404() {
    let res = order_client().get("/nowhere").unwrap();
    assert_eq!(res.status(), 404);
    let body = res.json().unwrap();
    assert_eq!(body["type"], "https://brrtrouter.dev/errors/not-found");
    assert_eq!(body["errors"], json!([]));
}

#[test]
fn test_malformed_json_is_400() {
    let res = order_client()
        .raw(
            RawRequest::new("POST", "/stores/7/orders")
                .with_header("Content-Type", "application/json")
                .with_body(&b"{\"sku\":"[..]),
        )
        .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(
        res.json().unwrap()["type"],
        "https://brrtrouter.dev/errors/bad-request"
    );
}

#[test]
fn test_oversized_body_is_400() {
    let config = ServerConfig::builder()
        .max_body_size(Some(8))
        .build()
        .unwrap();
    let client = TestClient::new(brrtdispatch::App::new(config));
    let res = client.post_json("/anything", &json!({"long": "enough to overflow"})).unwrap();
    assert_eq!(res.status(), 400);
}

#[test]
fn test_handler_error_is_generic_500() {
    let app = apps::quiet();
    app.route(
        "GET",
        "/boom",
        Arc::new(handler_fn(|_| -> anyhow::Result<BoundaryValue> {
            anyhow::bail!("database password is hunter2")
        })),
    )
    .unwrap();
    let res = apps::client(app).get("/boom").unwrap();
    assert_eq!(res.status(), 500);
    let body = res.json().unwrap();
    assert_eq!(body["type"], "https://brrtrouter.dev/errors/internal-server-error");
    assert!(!res.text().unwrap().contains("hunter2"));
}

#[test]
fn test_handler_panic_is_generic_500_and_logged() {
    let app = apps::quiet();
    app.route(
        "GET",
        "/panic",
        Arc::new(
            handler_fn(|_| -> anyhow::Result<BoundaryValue> { panic!("index out of bounds") })
                .named("panicky"),
        ),
    )
    .unwrap();
    let client = apps::client(app);
    let (res, logged) = logs::capture(|| client.get("/panic").unwrap());
    assert_eq!(res.status(), 500);
    assert!(!res.text().unwrap().contains("index out of bounds"));
    assert!(logged.contains("Handler panicked"));
    assert!(logged.contains("index out of bounds"));

    // The app keeps serving after a panic
    assert_eq!(client.get("/panic").unwrap().status(), 500);
}

#[test]
fn test_handler_can_return_failure() {
    let app = apps::quiet();
    app.route(
        "GET",
        "/items/{id}",
        Arc::new(handler_fn(|ctx| -> anyhow::Result<BoundaryValue> {
            Err(Failure::NotFound {
                method: ctx.request.method().to_string(),
                path: ctx.request.path().to_string(),
            }
            .into())
        })),
    )
    .unwrap();
    assert_eq!(apps::client(app).get("/items/9").unwrap().status(), 404);
}

#[test]
fn test_response_schema_violation_is_500() {
    let app = apps::quiet();
    let schemas = RouteSchemas::default().response(json!({
        "type": "object",
        "required": ["id"]
    }));
    app.route_with_schemas(
        "GET",
        "/good",
        Arc::new(handler_fn(|_| Ok(Response::json(json_value(json!({"id": 1})))))),
        schemas.clone(),
    )
    .unwrap();
    app.route_with_schemas(
        "GET",
        "/bad",
        Arc::new(handler_fn(|_| Ok(Response::json(json_value(json!({"name": "x"})))))),
        schemas.clone(),
    )
    .unwrap();
    app.route_with_schemas(
        "GET",
        "/teapot",
        Arc::new(handler_fn(|_| {
            Ok(Response::json(json_value(json!({"oops": true}))).with_status(418)?)
        })),
        schemas,
    )
    .unwrap();
    let client = apps::client(app);
    assert_eq!(client.get("/good").unwrap().status(), 200);
    assert_eq!(client.get("/bad").unwrap().status(), 500);
    // Only successful replies are checked
    assert_eq!(client.get("/teapot").unwrap().status(), 418);
}

#[test]
fn test_request_id_round_trip_and_logging() {
    let app = apps::empty();
    apps::constant(&app, "/ping", "pong");
    let client = apps::client(app);

    let inbound = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    let (res, logged) = logs::capture(|| {
        client
            .raw(RawRequest::new("GET", "/ping").with_header("x-request-id", inbound))
            .unwrap()
    });
    assert_eq!(res.header("X-Request-ID"), Some(inbound));
    assert!(logged.contains(inbound));
    assert!(logged.contains("Request complete"));

    // Anything that is not a ULID is replaced
    let res = client
        .raw(RawRequest::new("GET", "/ping").with_header("X-Request-ID", "abc-123"))
        .unwrap();
    let id = res.header("x-request-id").unwrap();
    assert_eq!(id.len(), 26);
    assert_ne!(id, "abc-123");
    assert_ne!(client.get("/ping").unwrap().header("x-request-id"), Some(id));
}

#[test]
fn test_value_conversion_over_the_wire() {
    let app = apps::quiet();
    apps::constant(&app, "/none", BoundaryValue::Null);
    apps::constant(&app, "/empty", "");
    apps::constant(&app, "/count", 3);
    let client = apps::client(app);

    let res = client.get("/none").unwrap();
    assert_eq!(res.status(), 204);
    assert!(res.body().is_empty());
    assert!(res.header("content-type").is_none());

    let res = client.get("/empty").unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.header("content-type"), Some("text/plain; charset=utf-8"));
    assert!(res.body().is_empty());

    assert_eq!(client.get("/count").unwrap().json().unwrap(), json!({"result": 3}));
}

fn json_value(v: serde_json::Value) -> BoundaryValue {
    BoundaryValue::from_json(v).unwrap()
}
