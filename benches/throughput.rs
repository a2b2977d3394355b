use brrtdispatch::codec;
use brrtdispatch::handler::handler_fn;
use brrtdispatch::request::RawRequest;
use brrtdispatch::{App, BoundaryValue, RouteTable};
use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;

const ROUTES: &[(&str, &str)] = &[
    ("GET", "/"),
    ("GET", "/zoo/animals"),
    ("POST", "/zoo/animals"),
    ("GET", "/zoo/animals/{id}"),
    ("PUT", "/zoo/animals/{id}"),
    ("PATCH", "/zoo/animals/{id}"),
    ("DELETE", "/zoo/animals/{id}"),
    ("GET", "/zoo/animals/{id}/toys/{toy_id}"),
    (
        "GET",
        "/zoo/{category}/animals/{id}/habitats/{habitat_id}/sections/{section_id}",
    ),
    (
        "POST",
        "/inventory/{warehouse_id}/feeds/{feed_id}/items/{item_id}/batches/{batch_id}",
    ),
    ("GET", "/complex/{a}/{b}/{c}/{d}/{e}/{f}/{g}/{h}/{i}"),
    ("HEAD", "/zoo/health"),
];

fn zoo_table() -> RouteTable {
    ROUTES.iter().fold(RouteTable::new(), |table, (method, path)| {
        table
            .add(method, path, Arc::new(handler_fn(|_| Ok(BoundaryValue::Null))))
            .unwrap()
    })
}

fn bench_route_match(c: &mut Criterion) {
    let table = zoo_table();
    let probes = [
        ("GET", "/zoo/animals/123"),
        ("GET", "/zoo/animals/123/toys/456"),
        ("GET", "/zoo/cats/animals/123/habitats/88/sections/5"),
        ("POST", "/inventory/1/feeds/2/items/3/batches/4"),
        ("GET", "/complex/1/2/3/4/5/6/7/8/9"),
        ("GET", "/nowhere/at/all"),
    ];
    c.bench_function("route_match", |b| {
        b.iter(|| {
            for (method, target) in &probes {
                black_box(table.find(method, target));
            }
        })
    });
}

fn bench_boundary_crossing(c: &mut Criterion) {
    let order = BoundaryValue::from_json(json!({
        "id": 12345,
        "customer": {"name": "Ada", "vip": true, "tags": ["early", "beta"]},
        "lines": (0..32)
            .map(|i| json!({"sku": format!("SKU-{i:04}"), "qty": i, "price": 19.99}))
            .collect::<Vec<_>>(),
        "note": null
    }))
    .unwrap();
    c.bench_function("boundary_cross", |b| {
        b.iter(|| black_box(codec::cross(black_box(&order)).unwrap()))
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let app = App::default();
    app.route(
        "GET",
        "/zoo/animals/{id}",
        Arc::new(handler_fn(|ctx| {
            Ok(BoundaryValue::from_json(json!({"id": ctx.request.path_param("id")}))?)
        })),
    )
    .unwrap();
    c.bench_function("dispatch_raw", |b| {
        b.iter(|| black_box(app.dispatch_raw(RawRequest::new("GET", "/zoo/animals/42?verbose=1"))))
    });
}

criterion_group!(
    benches,
    bench_route_match,
    bench_boundary_crossing,
    bench_dispatch
);
criterion_main!(benches);
