//! Per-FQN member tables learned from the kernel (or registered by the
//! binding layer) that drive marshaling of callback arguments and
//! struct fields.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::marshal::TypeRef;

/// Signature of one method: parameter descriptors in declaration order
/// and the return descriptor (`None` for void).
#[derive(Debug, Clone, Default)]
pub struct MethodSchema {
    pub parameters: Vec<TypeRef>,
    pub returns: Option<TypeRef>,
}

#[derive(Debug, Clone)]
pub struct PropertySchema {
    pub value_type: TypeRef,
    pub immutable: bool,
}

/// Member table for a class or interface FQN.
#[derive(Debug, Clone, Default)]
pub struct ClassSchema {
    pub methods: HashMap<String, MethodSchema>,
    pub properties: HashMap<String, PropertySchema>,
}

/// Field table for a by-value struct FQN.
#[derive(Debug, Clone, Default)]
pub struct StructSchema {
    pub fields: HashMap<String, TypeRef>,
}

/// Concurrent cache of type schemas keyed by FQN.
#[derive(Default)]
pub struct TypeCache {
    classes: RwLock<HashMap<String, Arc<ClassSchema>>>,
    structs: RwLock<HashMap<String, Arc<StructSchema>>>,
}

impl TypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_class(&self, fqn: impl Into<String>, schema: ClassSchema) {
        write(&self.classes).insert(fqn.into(), Arc::new(schema));
    }

    pub fn register_struct(&self, fqn: impl Into<String>, schema: StructSchema) {
        write(&self.structs).insert(fqn.into(), Arc::new(schema));
    }

    pub fn class(&self, fqn: &str) -> Option<Arc<ClassSchema>> {
        read(&self.classes).get(fqn).cloned()
    }

    pub fn struct_schema(&self, fqn: &str) -> Option<Arc<StructSchema>> {
        read(&self.structs).get(fqn).cloned()
    }

    /// Finds `method` on the first of `fqns` that declares it.
    pub fn method(&self, fqns: &[String], method: &str) -> Option<MethodSchema> {
        let classes = read(&self.classes);
        fqns.iter()
            .filter_map(|fqn| classes.get(fqn))
            .find_map(|schema| schema.methods.get(method).cloned())
    }

    /// Finds `property` on the first of `fqns` that declares it.
    pub fn property(&self, fqns: &[String], property: &str) -> Option<PropertySchema> {
        let classes = read(&self.classes);
        fqns.iter()
            .filter_map(|fqn| classes.get(fqn))
            .find_map(|schema| schema.properties.get(property).cloned())
    }

    /// Descriptor for one struct field, when the struct is known.
    pub fn struct_field(&self, fqn: &str, field: &str) -> Option<TypeRef> {
        read(&self.structs)
            .get(fqn)
            .and_then(|schema| schema.fields.get(field).cloned())
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
