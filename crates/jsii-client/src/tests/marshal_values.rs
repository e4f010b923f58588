use super::*;

use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::callbacks::{HostError, JsiiCallable};
use crate::marshal::{HostRef, JsiiValue, Marshaler, PrimitiveKind, TypeRef};
use crate::registry::ObjectRegistry;
use crate::schema::{StructSchema, TypeCache};
use crate::JsiiError;

fn marshaler() -> (Marshaler, Arc<ObjectRegistry>, Arc<TypeCache>) {
    let registry = Arc::new(ObjectRegistry::new());
    let schemas = Arc::new(TypeCache::new());
    (
        Marshaler::new(registry.clone(), schemas.clone()),
        registry,
        schemas,
    )
}

fn round_trip(marshaler: &Marshaler, value: JsiiValue, type_ref: &TypeRef) {
    let wire = marshaler.to_wire(&value, type_ref).unwrap();
    let back = marshaler.from_wire(&wire, type_ref).unwrap();
    assert_eq!(back, value, "wire form was {wire}");
    let wire_again = marshaler.to_wire(&back, type_ref).unwrap();
    assert_eq!(wire_again, wire);
}

#[test]
fn primitives_round_trip() {
    let (marshaler, _, _) = marshaler();
    round_trip(
        &marshaler,
        JsiiValue::Boolean(true),
        &TypeRef::Primitive(PrimitiveKind::Boolean),
    );
    round_trip(
        &marshaler,
        JsiiValue::Number(3.0),
        &TypeRef::Primitive(PrimitiveKind::Number),
    );
    round_trip(
        &marshaler,
        JsiiValue::Number(2.5),
        &TypeRef::Primitive(PrimitiveKind::Number),
    );
    round_trip(
        &marshaler,
        JsiiValue::String("hi".into()),
        &TypeRef::Primitive(PrimitiveKind::String),
    );
    round_trip(&marshaler, JsiiValue::Null, &TypeRef::Any);
}

#[test]
fn whole_numbers_are_emitted_as_json_integers() {
    let (marshaler, _, _) = marshaler();
    let wire = marshaler
        .to_wire(&JsiiValue::Number(3.0), &TypeRef::Primitive(PrimitiveKind::Number))
        .unwrap();
    assert_eq!(wire, json!(3));
}

#[test]
fn non_finite_numbers_are_rejected() {
    let (marshaler, _, _) = marshaler();
    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let error = marshaler
            .to_wire(&JsiiValue::Number(bad), &TypeRef::Primitive(PrimitiveKind::Number))
            .unwrap_err();
        assert!(matches!(error, JsiiError::Marshal(_)), "error: {error:?}");
    }
}

#[test]
fn dates_use_the_tagged_iso_form_in_utc() {
    let (marshaler, _, _) = marshaler();
    let date = OffsetDateTime::from_unix_timestamp(1_577_880_000).unwrap();
    let type_ref = TypeRef::Primitive(PrimitiveKind::Date);

    let wire = marshaler
        .to_wire(&JsiiValue::Date(date), &type_ref)
        .unwrap();
    assert_eq!(wire, json!({ "$jsii.date": "2020-01-01T12:00:00Z" }));
    round_trip(&marshaler, JsiiValue::Date(date), &type_ref);
}

#[test]
fn enums_round_trip_and_reject_foreign_fqns() {
    let (marshaler, _, _) = marshaler();
    let type_ref = TypeRef::Enum("my.Color".into());
    round_trip(
        &marshaler,
        JsiiValue::EnumMember {
            fqn: "my.Color".into(),
            member: "RED".into(),
        },
        &type_ref,
    );

    let error = marshaler
        .to_wire(
            &JsiiValue::EnumMember {
                fqn: "my.Shape".into(),
                member: "ROUND".into(),
            },
            &type_ref,
        )
        .unwrap_err();
    assert!(matches!(error, JsiiError::Marshal(_)));

    let error = marshaler
        .from_wire(&json!({ "$jsii.enum": "my.Shape/ROUND" }), &type_ref)
        .unwrap_err();
    assert!(matches!(error, JsiiError::Marshal(_)));
}

#[test]
fn byref_values_resolve_through_the_registry_with_identity() {
    let (marshaler, _registry, _) = marshaler();
    let wire = json!({ "$jsii.byref": "Obj@1", "$jsii.interfaces": ["my.IFace"] });
    let type_ref = TypeRef::Class("my.IFace".into());

    let first = marshaler.from_wire(&wire, &type_ref).unwrap();
    let second = marshaler.from_wire(&wire, &type_ref).unwrap();
    assert_eq!(first, second);
    match (&first, &second) {
        (JsiiValue::Reference(a), JsiiValue::Reference(b)) => assert!(Arc::ptr_eq(a, b)),
        other => panic!("unexpected values: {other:?}"),
    }

    let wire_again = marshaler.to_wire(&first, &type_ref).unwrap();
    assert_eq!(wire_again, wire);
}

struct Noop;

impl JsiiCallable for Noop {
    fn invoke(&self, _method: &str, _args: Vec<JsiiValue>) -> Result<JsiiValue, HostError> {
        Ok(JsiiValue::Null)
    }
}

#[test]
fn host_objects_are_tracked_on_first_send_and_keep_identity() {
    let (marshaler, registry, _) = marshaler();
    let object: Arc<dyn JsiiCallable> = Arc::new(Noop);
    let value = JsiiValue::HostObject(HostRef::new(object.clone()));
    let type_ref = TypeRef::Class("my.IHandler".into());

    let wire = marshaler.to_wire(&value, &type_ref).unwrap();
    assert_eq!(
        wire,
        json!({ "$jsii.byref": "jsii@1", "$jsii.interfaces": ["my.IHandler"] })
    );
    assert!(registry.resolve_host("jsii@1").is_some());

    // Sending again reuses the handle; receiving it back yields the
    // same host object.
    let wire_again = marshaler.to_wire(&value, &type_ref).unwrap();
    assert_eq!(wire_again, wire);
    let back = marshaler.from_wire(&wire, &type_ref).unwrap();
    assert_eq!(back, value);
}

#[test]
fn structs_round_trip_with_schema_driven_fields() {
    let (marshaler, _, schemas) = marshaler();
    schemas.register_struct(
        "my.Options",
        StructSchema {
            fields: [
                ("when".to_string(), TypeRef::Primitive(PrimitiveKind::Date)),
                ("count".to_string(), TypeRef::Primitive(PrimitiveKind::Number)),
            ]
            .into_iter()
            .collect(),
        },
    );

    let date = OffsetDateTime::from_unix_timestamp(1_577_880_000).unwrap();
    let value = JsiiValue::Struct {
        fqn: "my.Options".into(),
        fields: BTreeMap::from([
            ("when".to_string(), JsiiValue::Date(date)),
            ("count".to_string(), JsiiValue::Number(2.0)),
        ]),
    };
    round_trip(&marshaler, value, &TypeRef::Struct("my.Options".into()));
}

#[test]
fn plain_objects_are_accepted_as_struct_data() {
    let (marshaler, _, _) = marshaler();
    let wire = json!({ "count": 2 });
    let value = marshaler
        .from_wire(&wire, &TypeRef::Struct("my.Options".into()))
        .unwrap();
    match value {
        JsiiValue::Struct { fqn, fields } => {
            assert_eq!(fqn, "my.Options");
            assert_eq!(fields["count"], JsiiValue::Number(2.0));
        }
        other => panic!("unexpected value: {other:?}"),
    }
}

#[test]
fn collections_round_trip_element_wise() {
    let (marshaler, _, _) = marshaler();
    round_trip(
        &marshaler,
        JsiiValue::List(vec![
            JsiiValue::String("a".into()),
            JsiiValue::String("b".into()),
        ]),
        &TypeRef::List(Box::new(TypeRef::Primitive(PrimitiveKind::String))),
    );
    round_trip(
        &marshaler,
        JsiiValue::Map(BTreeMap::from([
            ("x".to_string(), JsiiValue::Number(1.0)),
            ("y".to_string(), JsiiValue::Number(2.0)),
        ])),
        &TypeRef::Map(Box::new(TypeRef::Primitive(PrimitiveKind::Number))),
    );
}

#[test]
fn union_resolution_follows_declaration_order() {
    let (marshaler, _, _) = marshaler();
    let type_ref = TypeRef::Union(vec![
        TypeRef::Primitive(PrimitiveKind::Number),
        TypeRef::Primitive(PrimitiveKind::String),
    ]);

    assert_eq!(
        marshaler.from_wire(&json!("hi"), &type_ref).unwrap(),
        JsiiValue::String("hi".into())
    );
    assert_eq!(
        marshaler.from_wire(&json!(4), &type_ref).unwrap(),
        JsiiValue::Number(4.0)
    );

    // `any` first swallows everything.
    let any_first = TypeRef::Union(vec![TypeRef::Any, TypeRef::Primitive(PrimitiveKind::Date)]);
    assert_eq!(
        marshaler
            .from_wire(&json!({ "$jsii.date": "2020-01-01T12:00:00Z" }), &any_first)
            .unwrap(),
        JsiiValue::Date(OffsetDateTime::from_unix_timestamp(1_577_880_000).unwrap())
    );

    let error = marshaler
        .from_wire(&json!(true), &type_ref)
        .unwrap_err();
    assert!(matches!(error, JsiiError::Marshal(_)));
}

#[test]
fn unknown_tagged_shapes_fail_with_marshal() {
    let (marshaler, _, _) = marshaler();
    let error = marshaler
        .from_wire(&json!({ "$jsii.mystery": 1 }), &TypeRef::Any)
        .unwrap_err();
    match error {
        JsiiError::Marshal(message) => assert!(message.contains("$jsii.mystery")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn any_discriminates_by_wire_shape_alone() {
    let (marshaler, _, _) = marshaler();
    let values = json!({
        "plain": { "nested": [1, "two", false] },
        "tagged": { "$jsii.enum": "my.Color/RED" }
    });
    let decoded = marshaler.from_wire(&values, &TypeRef::Any).unwrap();
    match decoded {
        JsiiValue::Map(entries) => {
            assert!(matches!(entries["plain"], JsiiValue::Map(_)));
            assert_eq!(
                entries["tagged"],
                JsiiValue::EnumMember {
                    fqn: "my.Color".into(),
                    member: "RED".into()
                }
            );
        }
        other => panic!("unexpected value: {other:?}"),
    }
}
