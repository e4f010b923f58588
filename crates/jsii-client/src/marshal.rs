//! Translation between host values and wire values, driven by type
//! descriptors. The wire side is `serde_json::Value`; the host side is
//! the tagged [`JsiiValue`] that generated bindings unwrap.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde_json::{json, Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};

use crate::api::{objref_handle, objref_interfaces, BYREF_TAG, DATE_TAG, ENUM_TAG, INTERFACES_TAG, STRUCT_TAG};
use crate::callbacks::JsiiCallable;
use crate::registry::{ObjectProxy, ObjectRegistry, HOST_HANDLE_PREFIX};
use crate::schema::TypeCache;
use crate::JsiiError;

/// Primitive kinds of the IDL type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Boolean,
    Number,
    String,
    Date,
    /// Arbitrary JSON data passed through untyped.
    Json,
}

/// A type descriptor, as emitted by the code generator at call sites.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Primitive(PrimitiveKind),
    Enum(String),
    /// A class or interface FQN; values are object references.
    Class(String),
    Struct(String),
    List(Box<TypeRef>),
    Map(Box<TypeRef>),
    /// Candidates in IDL declaration order; resolution picks the first
    /// structurally-accepting candidate.
    Union(Vec<TypeRef>),
    Optional(Box<TypeRef>),
    Any,
}

/// A host object reference with identity semantics: two refs are equal
/// iff they point at the same allocation.
#[derive(Clone)]
pub struct HostRef(pub(crate) Arc<dyn JsiiCallable>);

impl HostRef {
    pub fn new(object: Arc<dyn JsiiCallable>) -> Self {
        Self(object)
    }

    pub fn object(&self) -> &Arc<dyn JsiiCallable> {
        &self.0
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostRef({:p})", Arc::as_ptr(&self.0))
    }
}

impl PartialEq for HostRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A dynamically-typed value at the type-system boundary.
///
/// The IDL carries structural types (`any`, unions) a statically-typed
/// host cannot validate up front, so consumers match on the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum JsiiValue {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Date(OffsetDateTime),
    EnumMember { fqn: String, member: String },
    /// Reference to a kernel-owned object.
    Reference(Arc<ObjectProxy>),
    /// A host-originated object offered to the kernel by reference.
    HostObject(HostRef),
    Struct {
        fqn: String,
        fields: BTreeMap<String, JsiiValue>,
    },
    List(Vec<JsiiValue>),
    Map(BTreeMap<String, JsiiValue>),
    /// Raw JSON under the `json` primitive.
    Json(Value),
}

/// Marshals values across the boundary, resolving object references
/// through the registry and struct/member descriptors through the
/// schema cache.
#[derive(Clone)]
pub struct Marshaler {
    registry: Arc<ObjectRegistry>,
    schemas: Arc<TypeCache>,
}

impl Marshaler {
    pub fn new(registry: Arc<ObjectRegistry>, schemas: Arc<TypeCache>) -> Self {
        Self { registry, schemas }
    }

    /// Host value -> wire value under `type_ref`.
    pub fn to_wire(&self, value: &JsiiValue, type_ref: &TypeRef) -> Result<Value, JsiiError> {
        if matches!(value, JsiiValue::Null) {
            return Ok(Value::Null);
        }

        match type_ref {
            TypeRef::Optional(inner) => self.to_wire(value, inner),
            TypeRef::Any => self.any_to_wire(value),
            TypeRef::Primitive(kind) => self.primitive_to_wire(value, *kind),
            TypeRef::Enum(fqn) => match value {
                JsiiValue::EnumMember { fqn: value_fqn, member } if value_fqn == fqn => {
                    Ok(enum_to_wire(fqn, member))
                }
                JsiiValue::EnumMember { fqn: value_fqn, .. } => Err(JsiiError::Marshal(format!(
                    "enum value of `{value_fqn}` where `{fqn}` was expected"
                ))),
                other => Err(mismatch(other, &format!("enum `{fqn}`"))),
            },
            TypeRef::Class(fqn) => match value {
                JsiiValue::Reference(proxy) => Ok(byref_to_wire(proxy.handle(), proxy.interfaces())),
                JsiiValue::HostObject(host) => Ok(self.track_host(host, std::slice::from_ref(fqn))),
                other => Err(mismatch(other, &format!("reference to `{fqn}`"))),
            },
            TypeRef::Struct(fqn) => match value {
                JsiiValue::Struct { fqn: value_fqn, fields } => {
                    let fqn = if value_fqn.is_empty() { fqn } else { value_fqn };
                    self.struct_to_wire(fqn, fields)
                }
                // A bare mapping is accepted as struct data.
                JsiiValue::Map(fields) => self.struct_to_wire(fqn, fields),
                other => Err(mismatch(other, &format!("struct `{fqn}`"))),
            },
            TypeRef::List(element) => match value {
                JsiiValue::List(items) => {
                    let wire: Result<Vec<Value>, JsiiError> = items
                        .iter()
                        .map(|item| self.to_wire(item, element))
                        .collect();
                    Ok(Value::Array(wire?))
                }
                other => Err(mismatch(other, "list")),
            },
            TypeRef::Map(element) => match value {
                JsiiValue::Map(entries) => {
                    let mut wire = Map::new();
                    for (key, entry) in entries {
                        wire.insert(key.clone(), self.to_wire(entry, element)?);
                    }
                    Ok(Value::Object(wire))
                }
                other => Err(mismatch(other, "map")),
            },
            TypeRef::Union(candidates) => {
                for candidate in candidates {
                    if accepts_host(value, candidate) {
                        return self.to_wire(value, candidate);
                    }
                }
                Err(JsiiError::Marshal(format!(
                    "no union candidate accepts host value {value:?}"
                )))
            }
        }
    }

    /// Wire value -> host value under `type_ref`.
    pub fn from_wire(&self, wire: &Value, type_ref: &TypeRef) -> Result<JsiiValue, JsiiError> {
        if wire.is_null() {
            return Ok(JsiiValue::Null);
        }

        match type_ref {
            TypeRef::Optional(inner) => self.from_wire(wire, inner),
            TypeRef::Any => self.any_from_wire(wire),
            TypeRef::Primitive(kind) => self.primitive_from_wire(wire, *kind),
            TypeRef::Enum(fqn) => {
                let (wire_fqn, member) = enum_from_wire(wire)?;
                if wire_fqn != *fqn {
                    return Err(JsiiError::Marshal(format!(
                        "enum value of `{wire_fqn}` where `{fqn}` was expected"
                    )));
                }
                Ok(JsiiValue::EnumMember {
                    fqn: wire_fqn,
                    member,
                })
            }
            TypeRef::Class(fqn) => {
                let handle = objref_handle(wire).ok_or_else(|| {
                    JsiiError::Marshal(format!(
                        "expected reference to `{fqn}`, got wire value {wire}"
                    ))
                })?;
                self.resolve_reference(handle, &objref_interfaces(wire))
            }
            TypeRef::Struct(fqn) => self.struct_from_wire(wire, fqn),
            TypeRef::List(element) => match wire {
                Value::Array(items) => {
                    let values: Result<Vec<JsiiValue>, JsiiError> = items
                        .iter()
                        .map(|item| self.from_wire(item, element))
                        .collect();
                    Ok(JsiiValue::List(values?))
                }
                other => Err(JsiiError::Marshal(format!(
                    "expected array on the wire, got {other}"
                ))),
            },
            TypeRef::Map(element) => match wire {
                Value::Object(entries) if !is_tagged(entries) => {
                    let mut values = BTreeMap::new();
                    for (key, entry) in entries {
                        values.insert(key.clone(), self.from_wire(entry, element)?);
                    }
                    Ok(JsiiValue::Map(values))
                }
                other => Err(JsiiError::Marshal(format!(
                    "expected plain object on the wire, got {other}"
                ))),
            },
            TypeRef::Union(candidates) => {
                for candidate in candidates {
                    if accepts_wire(wire, candidate) {
                        return self.from_wire(wire, candidate);
                    }
                }
                Err(JsiiError::Marshal(format!(
                    "no union candidate accepts wire value {wire}"
                )))
            }
        }
    }

    fn primitive_to_wire(&self, value: &JsiiValue, kind: PrimitiveKind) -> Result<Value, JsiiError> {
        match (kind, value) {
            (PrimitiveKind::Boolean, JsiiValue::Boolean(flag)) => Ok(Value::Bool(*flag)),
            (PrimitiveKind::Number, JsiiValue::Number(number)) => number_to_wire(*number),
            (PrimitiveKind::String, JsiiValue::String(text)) => Ok(Value::String(text.clone())),
            (PrimitiveKind::Date, JsiiValue::Date(date)) => date_to_wire(date),
            (PrimitiveKind::Json, JsiiValue::Json(raw)) => Ok(raw.clone()),
            // `json` accepts any plain data shape.
            (PrimitiveKind::Json, other) => self.any_to_wire(other),
            (kind, other) => Err(mismatch(other, &format!("{kind:?} primitive"))),
        }
    }

    fn primitive_from_wire(&self, wire: &Value, kind: PrimitiveKind) -> Result<JsiiValue, JsiiError> {
        match (kind, wire) {
            (PrimitiveKind::Boolean, Value::Bool(flag)) => Ok(JsiiValue::Boolean(*flag)),
            (PrimitiveKind::Number, Value::Number(number)) => number
                .as_f64()
                .map(JsiiValue::Number)
                .ok_or_else(|| JsiiError::Marshal(format!("number {number} out of f64 range"))),
            (PrimitiveKind::String, Value::String(text)) => Ok(JsiiValue::String(text.clone())),
            (PrimitiveKind::Date, wire) => date_from_wire(wire),
            (PrimitiveKind::Json, wire) => Ok(JsiiValue::Json(wire.clone())),
            (kind, other) => Err(JsiiError::Marshal(format!(
                "expected {kind:?} primitive on the wire, got {other}"
            ))),
        }
    }

    /// Shape-driven marshaling when the static descriptor is `any`.
    fn any_to_wire(&self, value: &JsiiValue) -> Result<Value, JsiiError> {
        match value {
            JsiiValue::Null => Ok(Value::Null),
            JsiiValue::Boolean(flag) => Ok(Value::Bool(*flag)),
            JsiiValue::Number(number) => number_to_wire(*number),
            JsiiValue::String(text) => Ok(Value::String(text.clone())),
            JsiiValue::Date(date) => date_to_wire(date),
            JsiiValue::EnumMember { fqn, member } => Ok(enum_to_wire(fqn, member)),
            JsiiValue::Reference(proxy) => Ok(byref_to_wire(proxy.handle(), proxy.interfaces())),
            JsiiValue::HostObject(host) => Ok(self.track_host(host, &[])),
            JsiiValue::Struct { fqn, fields } => self.struct_to_wire(fqn, fields),
            JsiiValue::List(items) => {
                let wire: Result<Vec<Value>, JsiiError> =
                    items.iter().map(|item| self.any_to_wire(item)).collect();
                Ok(Value::Array(wire?))
            }
            JsiiValue::Map(entries) => {
                let mut wire = Map::new();
                for (key, entry) in entries {
                    wire.insert(key.clone(), self.any_to_wire(entry)?);
                }
                Ok(Value::Object(wire))
            }
            JsiiValue::Json(raw) => Ok(raw.clone()),
        }
    }

    /// Tag-driven marshaling when the static descriptor is `any`.
    fn any_from_wire(&self, wire: &Value) -> Result<JsiiValue, JsiiError> {
        match wire {
            Value::Null => Ok(JsiiValue::Null),
            Value::Bool(flag) => Ok(JsiiValue::Boolean(*flag)),
            Value::Number(number) => number
                .as_f64()
                .map(JsiiValue::Number)
                .ok_or_else(|| JsiiError::Marshal(format!("number {number} out of f64 range"))),
            Value::String(text) => Ok(JsiiValue::String(text.clone())),
            Value::Array(items) => {
                let values: Result<Vec<JsiiValue>, JsiiError> =
                    items.iter().map(|item| self.any_from_wire(item)).collect();
                Ok(JsiiValue::List(values?))
            }
            Value::Object(map) => {
                if map.contains_key(BYREF_TAG) {
                    let handle = objref_handle(wire).ok_or_else(|| {
                        JsiiError::Marshal(format!("malformed object reference: {wire}"))
                    })?;
                    return self.resolve_reference(handle, &objref_interfaces(wire));
                }
                if map.contains_key(ENUM_TAG) {
                    let (fqn, member) = enum_from_wire(wire)?;
                    return Ok(JsiiValue::EnumMember { fqn, member });
                }
                if map.contains_key(DATE_TAG) {
                    return date_from_wire(wire);
                }
                if map.contains_key(STRUCT_TAG) {
                    return self.struct_from_wire(wire, "");
                }
                if let Some(tag) = map.keys().find(|key| key.starts_with("$jsii.")) {
                    return Err(JsiiError::Marshal(format!(
                        "unknown tagged wire value `{tag}`"
                    )));
                }

                let mut values = BTreeMap::new();
                for (key, entry) in map {
                    values.insert(key.clone(), self.any_from_wire(entry)?);
                }
                Ok(JsiiValue::Map(values))
            }
        }
    }

    fn struct_to_wire(
        &self,
        fqn: &str,
        fields: &BTreeMap<String, JsiiValue>,
    ) -> Result<Value, JsiiError> {
        let mut data = Map::new();
        for (name, field) in fields {
            let descriptor = self
                .schemas
                .struct_field(fqn, name)
                .unwrap_or(TypeRef::Any);
            data.insert(name.clone(), self.to_wire(field, &descriptor)?);
        }
        Ok(json!({ STRUCT_TAG: { "fqn": fqn, "data": data } }))
    }

    /// Accepts the `$jsii.struct` wrapper as well as a plain object
    /// with out-of-band type information (`expected_fqn`).
    fn struct_from_wire(&self, wire: &Value, expected_fqn: &str) -> Result<JsiiValue, JsiiError> {
        let (fqn, data) = match wire {
            Value::Object(map) if map.contains_key(STRUCT_TAG) => {
                let inner = map
                    .get(STRUCT_TAG)
                    .and_then(Value::as_object)
                    .ok_or_else(|| {
                        JsiiError::Marshal(format!("malformed struct wrapper: {wire}"))
                    })?;
                let fqn = inner
                    .get("fqn")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        JsiiError::Marshal(format!("struct wrapper is missing `fqn`: {wire}"))
                    })?;
                let data = inner.get("data").and_then(Value::as_object).ok_or_else(|| {
                    JsiiError::Marshal(format!("struct wrapper is missing `data`: {wire}"))
                })?;
                (fqn.to_string(), data)
            }
            Value::Object(map) if !is_tagged(map) => (expected_fqn.to_string(), map),
            other => {
                return Err(JsiiError::Marshal(format!(
                    "expected struct on the wire, got {other}"
                )))
            }
        };

        let mut fields = BTreeMap::new();
        for (name, field) in data {
            let descriptor = self
                .schemas
                .struct_field(&fqn, name)
                .unwrap_or(TypeRef::Any);
            fields.insert(name.clone(), self.from_wire(field, &descriptor)?);
        }
        Ok(JsiiValue::Struct { fqn, fields })
    }

    fn resolve_reference(
        &self,
        handle: &str,
        interfaces: &[String],
    ) -> Result<JsiiValue, JsiiError> {
        // A synthetic handle coming back from the kernel refers to a
        // host object we tracked earlier; preserve its identity.
        if handle.starts_with(HOST_HANDLE_PREFIX) {
            let object = self.registry.resolve_host(handle).ok_or_else(|| {
                JsiiError::Marshal(format!("kernel referenced unknown host object `{handle}`"))
            })?;
            return Ok(JsiiValue::HostObject(HostRef(object)));
        }
        Ok(JsiiValue::Reference(self.registry.resolve(handle, interfaces)))
    }

    fn track_host(&self, host: &HostRef, interfaces: &[String]) -> Value {
        let handle = self.registry.track(host.0.clone(), interfaces);
        let interfaces = self.registry.host_interfaces(&handle);
        byref_to_wire(&handle, &interfaces)
    }
}

/// Structural acceptance of a host value by a descriptor, used for
/// union resolution. Never recurses into element types.
fn accepts_host(value: &JsiiValue, type_ref: &TypeRef) -> bool {
    match type_ref {
        TypeRef::Optional(inner) => matches!(value, JsiiValue::Null) || accepts_host(value, inner),
        TypeRef::Any => true,
        TypeRef::Primitive(PrimitiveKind::Boolean) => matches!(value, JsiiValue::Boolean(_)),
        TypeRef::Primitive(PrimitiveKind::Number) => matches!(value, JsiiValue::Number(_)),
        TypeRef::Primitive(PrimitiveKind::String) => matches!(value, JsiiValue::String(_)),
        TypeRef::Primitive(PrimitiveKind::Date) => matches!(value, JsiiValue::Date(_)),
        TypeRef::Primitive(PrimitiveKind::Json) => matches!(value, JsiiValue::Json(_)),
        TypeRef::Enum(fqn) => {
            matches!(value, JsiiValue::EnumMember { fqn: value_fqn, .. } if value_fqn == fqn)
        }
        TypeRef::Class(_) => {
            matches!(value, JsiiValue::Reference(_) | JsiiValue::HostObject(_))
        }
        TypeRef::Struct(fqn) => match value {
            JsiiValue::Struct { fqn: value_fqn, .. } => {
                value_fqn.is_empty() || value_fqn == fqn
            }
            JsiiValue::Map(_) => true,
            _ => false,
        },
        TypeRef::List(_) => matches!(value, JsiiValue::List(_)),
        TypeRef::Map(_) => matches!(value, JsiiValue::Map(_)),
        TypeRef::Union(candidates) => candidates.iter().any(|c| accepts_host(value, c)),
    }
}

/// Structural acceptance of a wire value by a descriptor: tagged form
/// first, then primitive kind, then struct fqn match.
fn accepts_wire(wire: &Value, type_ref: &TypeRef) -> bool {
    match type_ref {
        TypeRef::Optional(inner) => wire.is_null() || accepts_wire(wire, inner),
        TypeRef::Any => true,
        TypeRef::Primitive(PrimitiveKind::Boolean) => wire.is_boolean(),
        TypeRef::Primitive(PrimitiveKind::Number) => wire.is_number(),
        TypeRef::Primitive(PrimitiveKind::String) => wire.is_string(),
        TypeRef::Primitive(PrimitiveKind::Date) => tagged_with(wire, DATE_TAG),
        TypeRef::Primitive(PrimitiveKind::Json) => true,
        TypeRef::Enum(fqn) => match wire.as_object().and_then(|map| map.get(ENUM_TAG)) {
            Some(Value::String(literal)) => literal
                .rsplit_once('/')
                .is_some_and(|(wire_fqn, _)| wire_fqn == fqn),
            _ => false,
        },
        TypeRef::Class(_) => tagged_with(wire, BYREF_TAG),
        TypeRef::Struct(fqn) => match wire.as_object() {
            Some(map) if map.contains_key(STRUCT_TAG) => map
                .get(STRUCT_TAG)
                .and_then(Value::as_object)
                .and_then(|inner| inner.get("fqn"))
                .and_then(Value::as_str)
                .is_some_and(|wire_fqn| wire_fqn == fqn),
            Some(map) => !is_tagged(map),
            None => false,
        },
        TypeRef::List(_) => wire.is_array(),
        TypeRef::Map(_) => wire.as_object().is_some_and(|map| !is_tagged(map)),
        TypeRef::Union(candidates) => candidates.iter().any(|c| accepts_wire(wire, c)),
    }
}

fn is_tagged(map: &Map<String, Value>) -> bool {
    map.keys().any(|key| key.starts_with("$jsii."))
}

fn tagged_with(wire: &Value, tag: &str) -> bool {
    wire.as_object().is_some_and(|map| map.contains_key(tag))
}

/// JSON cannot carry NaN or infinities; whole numbers are emitted as
/// integers so values round-trip bit-exactly.
fn number_to_wire(number: f64) -> Result<Value, JsiiError> {
    if !number.is_finite() {
        return Err(JsiiError::Marshal(format!(
            "non-finite number {number} cannot be represented in JSON"
        )));
    }
    if number.fract() == 0.0 && (i64::MIN as f64..=i64::MAX as f64).contains(&number) {
        return Ok(json!(number as i64));
    }
    Ok(json!(number))
}

fn byref_to_wire(handle: &str, interfaces: &[String]) -> Value {
    let mut map = Map::new();
    map.insert(BYREF_TAG.to_string(), Value::String(handle.to_string()));
    if !interfaces.is_empty() {
        map.insert(
            INTERFACES_TAG.to_string(),
            Value::Array(
                interfaces
                    .iter()
                    .map(|fqn| Value::String(fqn.clone()))
                    .collect(),
            ),
        );
    }
    Value::Object(map)
}

fn enum_to_wire(fqn: &str, member: &str) -> Value {
    json!({ ENUM_TAG: format!("{fqn}/{member}") })
}

fn enum_from_wire(wire: &Value) -> Result<(String, String), JsiiError> {
    let literal = wire
        .as_object()
        .and_then(|map| map.get(ENUM_TAG))
        .and_then(Value::as_str)
        .ok_or_else(|| JsiiError::Marshal(format!("expected enum on the wire, got {wire}")))?;
    let (fqn, member) = literal.rsplit_once('/').ok_or_else(|| {
        JsiiError::Marshal(format!("enum literal `{literal}` is missing a member"))
    })?;
    Ok((fqn.to_string(), member.to_string()))
}

fn date_to_wire(date: &OffsetDateTime) -> Result<Value, JsiiError> {
    let formatted = date
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|source| JsiiError::Marshal(format!("unformattable date: {source}")))?;
    Ok(json!({ DATE_TAG: formatted }))
}

fn date_from_wire(wire: &Value) -> Result<JsiiValue, JsiiError> {
    let literal = wire
        .as_object()
        .and_then(|map| map.get(DATE_TAG))
        .and_then(Value::as_str)
        .ok_or_else(|| JsiiError::Marshal(format!("expected date on the wire, got {wire}")))?;
    let parsed = OffsetDateTime::parse(literal, &Rfc3339)
        .map_err(|source| JsiiError::Marshal(format!("invalid date `{literal}`: {source}")))?;
    Ok(JsiiValue::Date(parsed.to_offset(UtcOffset::UTC)))
}

fn mismatch(value: &JsiiValue, expected: &str) -> JsiiError {
    JsiiError::Marshal(format!("host value {value:?} where {expected} was expected"))
}
