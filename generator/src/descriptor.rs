// descriptor.rs - Type descriptors and the arena that owns them
//
// Every data shape the generator knows about is a `TypeDescriptor` stored in
// a `TypeArena` and referred to by `TypeId`. Descriptors are immutable once
// interned, except records, which are declared first and defined once so that
// a record can point at itself.
//
// Preconditions: field names are unique within one descriptor.
// Postconditions: structurally equal non-record descriptors share a `TypeId`.
// Failure modes: duplicate field names, redefinition of a record, a record
//                that would contain itself without a pointer in between.
// Side effects: none.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::typemap::Origin;

/// Index of a descriptor in its session's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// One named, typed member of a composite descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Field {
            name: name.into(),
            ty,
        }
    }
}

/// Array element descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TensorDescriptor {
    Scalar(String),
    Structured(Vec<Field>),
}

/// Foreign-call descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ForeignDescriptor {
    Scalar(String),
    /// `name` is informational; synthesized structures have an empty name.
    Structure { name: String, fields: Vec<Field> },
}

/// Host-native scalar leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostScalar {
    Bool,
    Int,
    Float,
}

impl HostScalar {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(HostScalar::Bool),
            "int" => Some(HostScalar::Int),
            "float" => Some(HostScalar::Float),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostScalar::Bool => "bool",
            HostScalar::Int => "int",
            HostScalar::Float => "float",
        }
    }
}

/// Annotated record: a host class with named, typed fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordDescriptor {
    pub name: String,
    /// `None` until the record is defined.
    pub fields: Option<Vec<Field>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// A literal target spelling, used verbatim as a canonical name.
    Target(String),
    Tensor(TensorDescriptor),
    Foreign(ForeignDescriptor),
    Host(HostScalar),
    Record(RecordDescriptor),
    Pointer { origin: Origin, pointee: TypeId },
}

impl TypeDescriptor {
    pub fn origin(&self) -> Origin {
        match self {
            TypeDescriptor::Target(_) => Origin::Target,
            TypeDescriptor::Tensor(_) => Origin::Tensor,
            TypeDescriptor::Foreign(_) => Origin::Foreign,
            TypeDescriptor::Host(_) | TypeDescriptor::Record(_) => Origin::Host,
            TypeDescriptor::Pointer { origin, .. } => *origin,
        }
    }

    /// Fields of a composite; `None` for leaves and undefined records.
    pub fn fields(&self) -> Option<&[Field]> {
        match self {
            TypeDescriptor::Tensor(TensorDescriptor::Structured(fields))
            | TypeDescriptor::Foreign(ForeignDescriptor::Structure { fields, .. }) => Some(fields),
            TypeDescriptor::Record(RecordDescriptor { fields, .. }) => fields.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Target(s) => write!(f, "C type '{s}'"),
            TypeDescriptor::Tensor(TensorDescriptor::Scalar(s)) => write!(f, "tensor scalar '{s}'"),
            TypeDescriptor::Tensor(TensorDescriptor::Structured(fields)) => {
                write!(f, "tensor struct with {} fields", fields.len())
            }
            TypeDescriptor::Foreign(ForeignDescriptor::Scalar(s)) => write!(f, "foreign scalar '{s}'"),
            TypeDescriptor::Foreign(ForeignDescriptor::Structure { name, .. }) if name.is_empty() => {
                write!(f, "synthesized foreign structure")
            }
            TypeDescriptor::Foreign(ForeignDescriptor::Structure { name, .. }) => {
                write!(f, "foreign structure '{name}'")
            }
            TypeDescriptor::Host(s) => write!(f, "host scalar '{}'", s.as_str()),
            TypeDescriptor::Record(r) => write!(f, "record '{}'", r.name),
            TypeDescriptor::Pointer { origin, pointee } => {
                write!(f, "{origin} pointer to #{}", pointee.0)
            }
        }
    }
}

// ── Arena ───────────────────────────────────────────────────────────────────

/// Session-owned store of descriptors.
#[derive(Debug, Default)]
pub struct TypeArena {
    types: Vec<TypeDescriptor>,
    interned: HashMap<TypeDescriptor, TypeId>,
}

impl TypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TypeId) -> &TypeDescriptor {
        &self.types[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn push(&mut self, descriptor: TypeDescriptor) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(descriptor);
        id
    }

    /// Intern a descriptor without fields. Leaves cannot fail validation.
    pub fn intern_leaf(&mut self, descriptor: TypeDescriptor) -> TypeId {
        debug_assert!(descriptor.fields().is_none());
        if let Some(&id) = self.interned.get(&descriptor) {
            return id;
        }
        let id = self.push(descriptor.clone());
        self.interned.insert(descriptor, id);
        id
    }

    /// Intern a descriptor, returning the existing id for an equal one.
    /// Records always get a fresh id.
    pub fn intern(&mut self, descriptor: TypeDescriptor) -> Result<TypeId> {
        if let Some(fields) = descriptor.fields() {
            check_unique(&descriptor, fields)?;
        }
        if matches!(descriptor, TypeDescriptor::Record(_)) {
            return Ok(self.push(descriptor));
        }
        if let Some(&id) = self.interned.get(&descriptor) {
            return Ok(id);
        }
        let id = self.push(descriptor.clone());
        self.interned.insert(descriptor, id);
        Ok(id)
    }

    /// Declare a new record. Records are never merged with one another.
    pub fn declare_record(&mut self, name: impl Into<String>) -> TypeId {
        self.push(TypeDescriptor::Record(RecordDescriptor {
            name: name.into(),
            fields: None,
        }))
    }

    /// Give a declared record its fields. A record is defined exactly once.
    pub fn define_record(&mut self, id: TypeId, fields: Vec<Field>) -> Result<()> {
        let descriptor = &self.types[id.0 as usize];
        let TypeDescriptor::Record(record) = descriptor else {
            return Err(Error::NamingConflict {
                descriptor: descriptor.to_string(),
                name: String::new(),
                reason: "only records can be defined after declaration".to_string(),
            });
        };
        if record.fields.is_some() {
            return Err(Error::NamingConflict {
                descriptor: descriptor.to_string(),
                name: record.name.clone(),
                reason: "record is already defined".to_string(),
            });
        }
        check_unique(descriptor, &fields)?;
        if self.contains_by_value(&fields, id) {
            return Err(Error::SelfContainingRecord {
                name: record.name.clone(),
            });
        }
        if let TypeDescriptor::Record(record) = &mut self.types[id.0 as usize] {
            record.fields = Some(fields);
        }
        Ok(())
    }

    /// Whether `target` is reachable from `fields` without crossing a pointer.
    fn contains_by_value(&self, fields: &[Field], target: TypeId) -> bool {
        let mut pending: Vec<TypeId> = fields.iter().map(|f| f.ty).collect();
        let mut seen = HashSet::new();
        while let Some(ty) = pending.pop() {
            if ty == target {
                return true;
            }
            if !seen.insert(ty) {
                continue;
            }
            if let Some(fields) = self.get(ty).fields() {
                pending.extend(fields.iter().map(|f| f.ty));
            }
        }
        false
    }
}

fn check_unique(owner: &TypeDescriptor, fields: &[Field]) -> Result<()> {
    let mut seen = HashSet::new();
    for field in fields {
        if !seen.insert(field.name.as_str()) {
            return Err(Error::DuplicateField {
                owner: owner.to_string(),
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_descriptors_share_an_id() {
        let mut arena = TypeArena::new();
        let a = arena.intern(TypeDescriptor::Tensor(TensorDescriptor::Scalar("int32".into()))).unwrap();
        let b = arena.intern(TypeDescriptor::Tensor(TensorDescriptor::Scalar("int32".into()))).unwrap();
        assert_eq!(a, b);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn same_spelling_in_two_origins_differs() {
        let mut arena = TypeArena::new();
        let c = arena.intern(TypeDescriptor::Target("double".into())).unwrap();
        let t = arena.intern(TypeDescriptor::Tensor(TensorDescriptor::Scalar("double".into()))).unwrap();
        assert_ne!(c, t);
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let mut arena = TypeArena::new();
        let int = arena.intern(TypeDescriptor::Target("int".into())).unwrap();
        let err = arena
            .intern(TypeDescriptor::Tensor(TensorDescriptor::Structured(vec![
                Field::new("x", int),
                Field::new("x", int),
            ])))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateField { ref field, .. } if field == "x"));
    }

    #[test]
    fn records_are_identity_typed() {
        let mut arena = TypeArena::new();
        let a = arena.declare_record("Node");
        let b = arena.declare_record("Node");
        assert_ne!(a, b);
        assert!(arena.get(a).fields().is_none());
    }

    #[test]
    fn record_can_point_at_itself() {
        let mut arena = TypeArena::new();
        let node = arena.declare_record("Node");
        let next = arena
            .intern(TypeDescriptor::Pointer {
                origin: Origin::Target,
                pointee: node,
            })
            .unwrap();
        arena.define_record(node, vec![Field::new("next", next)]).unwrap();
        assert_eq!(arena.get(node).fields().unwrap()[0].ty, next);
        assert!(arena.define_record(node, Vec::new()).is_err());
    }

    #[test]
    fn record_holding_itself_by_value_is_rejected() {
        let mut arena = TypeArena::new();
        let node = arena.declare_record("Node");
        let err = arena.define_record(node, vec![Field::new("me", node)]).unwrap_err();
        assert!(matches!(err, Error::SelfContainingRecord { ref name } if name == "Node"));
        assert!(arena.get(node).fields().is_none());
    }

    #[test]
    fn cycle_through_a_structure_is_rejected() {
        let mut arena = TypeArena::new();
        let outer = arena.declare_record("Outer");
        let boxed = arena
            .intern(TypeDescriptor::Tensor(TensorDescriptor::Structured(vec![Field::new("outer", outer)])))
            .unwrap();
        let err = arena.define_record(outer, vec![Field::new("boxed", boxed)]).unwrap_err();
        assert_eq!(err.code().to_string(), "E0107");
    }
}
