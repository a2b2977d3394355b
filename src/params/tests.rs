use super::*;
use crate::config::ConfigError;
use crate::problem::Failure;
use crate::request::{FileRef, Request};
use crate::value::BoundaryValue;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

fn query(name: &str, ty: ParamType) -> ParameterDescriptorBuilder {
    ParameterDescriptor::builder(name, ParameterSource::Query).param_type(ty)
}

#[test]
fn both_defaults_is_a_config_error() {
    let err = query("page", ParamType::Int)
        .default_value(1)
        .default_factory(|| BoundaryValue::Int(1))
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        ConfigError::ConflictingDefaults {
            parameter: "page".into()
        }
    );
}

#[test]
fn null_literal_is_no_default() {
    let d = query("q", ParamType::String)
        .default_value(BoundaryValue::Null)
        .build()
        .unwrap();
    assert!(!d.has_default());
}

#[test]
fn falsy_defaults_are_defaults() {
    for v in [
        BoundaryValue::Int(0),
        BoundaryValue::Bool(false),
        BoundaryValue::Str(String::new()),
        BoundaryValue::List(vec![]),
    ] {
        let d = query("x", ParamType::Any).default_value(v.clone()).build().unwrap();
        assert!(d.has_default(), "{v:?}");
        let args = ParameterResolver::new()
            .resolve(&[d], &Request::builder("GET", "/").build())
            .unwrap();
        assert_eq!(args.get("x"), Some(&v));
    }
}

#[test]
fn factory_runs_on_every_resolution() {
    let counter = Arc::new(AtomicI64::new(0));
    let c = Arc::clone(&counter);
    let d = query("n", ParamType::Int)
        .default_factory(move || BoundaryValue::Int(c.fetch_add(1, Ordering::SeqCst)))
        .build()
        .unwrap();
    let resolver = ParameterResolver::new();
    let req = Request::builder("GET", "/").build();
    let first = resolver.resolve(std::slice::from_ref(&d), &req).unwrap();
    let second = resolver.resolve(std::slice::from_ref(&d), &req).unwrap();
    assert_eq!(first.get("n"), Some(&BoundaryValue::Int(0)));
    assert_eq!(second.get("n"), Some(&BoundaryValue::Int(1)));
}

#[test]
fn query_scalar_takes_last_and_list_takes_all() {
    let req = Request::builder("GET", "/?id=1&id=2&id=3").build();
    let scalar = query("id", ParamType::Int).build().unwrap();
    let list = ParameterDescriptor::builder("ids", ParameterSource::Query)
        .alias("id")
        .param_type(ParamType::list_of(ParamType::Int))
        .build()
        .unwrap();
    let args = ParameterResolver::new().resolve(&[scalar, list], &req).unwrap();
    assert_eq!(args.get("id"), Some(&BoundaryValue::Int(3)));
    assert_eq!(
        args.get("ids"),
        Some(&BoundaryValue::List(vec![
            BoundaryValue::Int(1),
            BoundaryValue::Int(2),
            BoundaryValue::Int(3)
        ]))
    );
}

#[test]
fn lists_split_on_commas_for_every_source() {
    let tags = |source| {
        ParameterDescriptor::builder("tags", source)
            .param_type(ParamType::list_of(ParamType::String))
            .build()
            .unwrap()
    };
    let expected = BoundaryValue::List(vec!["a".into(), "b".into(), "c".into()]);
    let resolver = ParameterResolver::new();

    for target in [
        "/?tags=a,b,c",
        "/?tags=a,b&tags=c",
        "/?tags=a&tags=b&tags=c",
        "/?tags=a,,b,%20c",
    ] {
        let req = Request::builder("GET", target).build();
        let args = resolver.resolve(&[tags(ParameterSource::Query)], &req).unwrap();
        assert_eq!(args.get("tags"), Some(&expected), "{target}");
    }

    let req = Request::builder("GET", "/")
        .header("tags", "a, b,c")
        .cookie("tags", "a,b,c")
        .path_param("tags", "a,b,c")
        .build();
    for source in [
        ParameterSource::Header,
        ParameterSource::Cookie,
        ParameterSource::Path,
    ] {
        let args = resolver.resolve(&[tags(source)], &req).unwrap();
        assert_eq!(args.get("tags"), Some(&expected), "{source:?}");
    }
}

#[test]
fn header_lookup_order() {
    let d = ParameterDescriptor::builder("x_request_source", ParameterSource::Header)
        .param_type(ParamType::String)
        .build()
        .unwrap();
    let req = Request::builder("GET", "/")
        .header("X-Request-Source", "mobile")
        .build();
    let args = ParameterResolver::new().resolve(&[d], &req).unwrap();
    assert_eq!(args.get("x_request_source"), Some(&BoundaryValue::Str("mobile".into())));

    let aliased = ParameterDescriptor::builder("token", ParameterSource::Header)
        .alias("Authorization")
        .build()
        .unwrap();
    let req = Request::builder("GET", "/")
        .header("authorization", "Bearer abc")
        .header("token", "ignored")
        .build();
    let args = ParameterResolver::new().resolve(&[aliased], &req).unwrap();
    assert_eq!(args.get("token"), Some(&BoundaryValue::Str("Bearer abc".into())));
}

#[test]
fn underscore_conversion_can_be_disabled() {
    let d = ParameterDescriptor::builder("x_trace", ParameterSource::Header)
        .convert_header_underscores(false)
        .build()
        .unwrap();
    let req = Request::builder("GET", "/").header("x-trace", "1").build();
    let err = ParameterResolver::new().resolve(&[d], &req).unwrap_err();
    assert!(matches!(err, ResolutionError::MissingRequiredParameter { .. }));
}

#[test]
fn missing_required_and_optional() {
    let req = Request::builder("GET", "/").build();
    let optional = ParameterDescriptor::builder("session", ParameterSource::Cookie)
        .optional()
        .build()
        .unwrap();
    let args = ParameterResolver::new()
        .resolve(std::slice::from_ref(&optional), &req)
        .unwrap();
    assert_eq!(args.get("session"), Some(&BoundaryValue::Null));

    let required = ParameterDescriptor::builder("id", ParameterSource::Path)
        .build()
        .unwrap();
    let err = ParameterResolver::new()
        .resolve(&[optional, required], &req)
        .unwrap_err();
    assert_eq!(
        err,
        ResolutionError::MissingRequiredParameter {
            name: "id".into(),
            source: ParameterSource::Path
        }
    );
}

#[test]
fn coercion_failure_is_invalid_value() {
    let req = Request::builder("GET", "/?age=abc").build();
    let err = ParameterResolver::new()
        .resolve(&[query("age", ParamType::Int).build().unwrap()], &req)
        .unwrap_err();
    match err.clone() {
        ResolutionError::InvalidParameterValue { input, expected, .. } => {
            assert_eq!(input, BoundaryValue::Str("abc".into()));
            assert_eq!(expected, ParamType::Int);
        }
        other => panic!("unexpected {other:?}"),
    }
    match err.into_failure() {
        Failure::Validation(errors) => {
            assert_eq!(errors[0].error_type, "int_parsing");
            assert_eq!(errors[0].loc_string(), "query.age");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn sensitive_invalid_input_is_redacted() {
    let req = Request::builder("GET", "/?pin_token=abc").build();
    let d = query("pin_token", ParamType::Int).build().unwrap();
    let err = ParameterResolver::new().resolve(&[d], &req).unwrap_err();
    assert!(matches!(
        err,
        ResolutionError::InvalidParameterValue {
            input: BoundaryValue::Str(ref s),
            ..
        } if s == "[REDACTED]"
    ));
}

#[test]
fn bool_and_float_coercion() {
    let req = Request::builder("GET", "/?active=yes&ratio=0.25&bad=NaN").build();
    let args = ParameterResolver::new()
        .resolve(
            &[
                query("active", ParamType::Bool).build().unwrap(),
                query("ratio", ParamType::Float).build().unwrap(),
            ],
            &req,
        )
        .unwrap();
    assert_eq!(args.get("active"), Some(&BoundaryValue::Bool(true)));
    assert_eq!(args.get("ratio"), Some(&BoundaryValue::Float(0.25)));

    let err = ParameterResolver::new()
        .resolve(&[query("bad", ParamType::Float).build().unwrap()], &req)
        .unwrap_err();
    assert!(matches!(err, ResolutionError::InvalidParameterValue { .. }));
}

#[test]
fn body_is_type_checked_not_coerced() {
    let body = ParameterDescriptor::builder("payload", ParameterSource::Body)
        .param_type(ParamType::Map)
        .build()
        .unwrap();
    let req = Request::builder("POST", "/").body("not a map").build();
    let err = ParameterResolver::new().resolve(&[body], &req).unwrap_err();
    assert!(matches!(err, ResolutionError::InvalidParameterValue { .. }));
}

#[test]
fn float_accepts_exact_int_from_body() {
    let d = ParameterDescriptor::builder("price", ParameterSource::Body)
        .param_type(ParamType::Float)
        .build()
        .unwrap();
    let req = Request::builder("POST", "/").body(20).build();
    let args = ParameterResolver::new().resolve(&[d], &req).unwrap();
    assert_eq!(args.get("price"), Some(&BoundaryValue::Float(20.0)));
}

#[test]
fn implicit_and_file_sources() {
    let db = ParameterDescriptor::builder("db", ParameterSource::Implicit)
        .build()
        .unwrap();
    let upload = ParameterDescriptor::builder("avatar", ParameterSource::Body)
        .param_type(ParamType::File)
        .build()
        .unwrap();
    let req = Request::builder("POST", "/")
        .dependency("db", "pool-1")
        .file("avatar", FileRef::new("me.png", "image/png", &b"\x89PNG"[..]))
        .build();
    let args = ParameterResolver::new().resolve(&[db, upload], &req).unwrap();
    assert_eq!(args.get("db"), Some(&BoundaryValue::Str("pool-1".into())));
    let file = args.get("avatar").unwrap();
    assert_eq!(file.get("filename"), Some(&BoundaryValue::Str("me.png".into())));
    assert_eq!(file.get("size"), Some(&BoundaryValue::Int(4)));
}

#[test]
fn custom_types() {
    let d = ParameterDescriptor::builder("user", ParameterSource::Implicit)
        .param_type(ParamType::Custom("CurrentUser".into()))
        .build()
        .unwrap();
    let req = Request::builder("GET", "/").header("x-user", "ada").build();

    let err = ParameterResolver::new()
        .resolve(std::slice::from_ref(&d), &req)
        .unwrap_err();
    assert_eq!(
        err,
        ResolutionError::UnresolvableParameterType {
            name: "user".into(),
            type_name: "CurrentUser".into()
        }
    );
    assert!(matches!(err.into_failure(), Failure::Internal(_)));

    let resolver = ParameterResolver::new().with_custom(
        "CurrentUser",
        |_: &ParameterDescriptor, r: &Request| -> anyhow::Result<BoundaryValue> {
            let name = r
                .header("x-user")
                .ok_or_else(|| anyhow::anyhow!("no user header"))?;
            Ok(BoundaryValue::Str(name.to_uppercase()))
        },
    );
    let args = resolver.resolve(std::slice::from_ref(&d), &req).unwrap();
    assert_eq!(args.get("user"), Some(&BoundaryValue::Str("ADA".into())));

    let anonymous = Request::builder("GET", "/").build();
    let err = resolver.resolve(&[d], &anonymous).unwrap_err();
    assert!(matches!(err, ResolutionError::CustomResolverFailed { .. }));
}

#[test]
fn arguments_extract_typed() {
    let req = Request::builder("GET", "/?limit=5").build();
    let args = ParameterResolver::new()
        .resolve(&[query("limit", ParamType::Int).build().unwrap()], &req)
        .unwrap();
    assert_eq!(args.extract::<i64>("limit").unwrap(), 5);
    assert!(args.extract::<String>("limit").is_err());
    assert!(args.extract::<i64>("missing").is_err());
}

#[test]
fn resolve_all_reports_every_bad_parameter() {
    let descriptors = [
        query("age", ParamType::Int).build().unwrap(),
        query("limit", ParamType::Int).build().unwrap(),
        ParameterDescriptor::builder("x-token", ParameterSource::Header)
            .build()
            .unwrap(),
    ];
    let request = Request::builder("GET", "/")
        .query("age", "old")
        .query("limit", "ten")
        .build();
    let errors = ParameterResolver::new()
        .resolve_all(&descriptors, &request)
        .unwrap_err();
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(ResolutionError::is_client_error));

    let Failure::Validation(fields) = ResolutionError::into_combined_failure(errors) else {
        panic!("expected a validation failure");
    };
    let locs: Vec<String> = fields.iter().map(|f| f.loc_string()).collect();
    assert_eq!(locs, ["query.age", "query.limit", "header.x-token"]);
    assert_eq!(fields[2].error_type, "missing");
}

#[test]
fn server_fault_wins_over_field_errors() {
    let descriptors = [
        query("age", ParamType::Int).build().unwrap(),
        ParameterDescriptor::builder("db", ParameterSource::Query)
            .param_type(ParamType::Custom("Pool".into()))
            .build()
            .unwrap(),
    ];
    let errors = ParameterResolver::new()
        .resolve_all(&descriptors, &Request::builder("GET", "/").build())
        .unwrap_err();
    assert_eq!(errors.len(), 2);
    assert!(matches!(
        ResolutionError::into_combined_failure(errors),
        Failure::Internal(_)
    ));
}

#[test]
fn resolve_all_matches_resolve_on_success() {
    let descriptors = [query("page", ParamType::Int).default_value(1).build().unwrap()];
    let request = Request::builder("GET", "/").query("page", "3").build();
    let resolver = ParameterResolver::new();
    assert_eq!(
        resolver.resolve_all(&descriptors, &request).unwrap(),
        resolver.resolve(&descriptors, &request).unwrap()
    );
}
