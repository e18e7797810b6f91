// structure.rs - Structure generator: canonical names and definitions
//
// Resolves every descriptor of every origin to one canonical C name, derives
// its definition (ordered fields or a spelling), and lists the composites a
// descriptor transitively contains in an order that is safe to emit.
//
// Names come from, in order of precedence: an explicit rename, the pointer
// rule (`"<pointee> *"`), the scalar correspondence table, or a SHA-256 hash
// of the ordered `(field name, field canonical name)` pairs.
//
// Preconditions: descriptors are immutable once registered.
// Postconditions: a name, once assigned, never changes for the session.
// Failure modes: renaming an already-named descriptor (or one of its
//                counterparts) produces `NamingConflict`; unknown scalars,
//                undefined records and unnamed recursion are errors.
// Side effects: none beyond the session caches.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::rc::Rc;

use sha2::{Digest, Sha256};

use crate::descriptor::{
    Field, ForeignDescriptor, HostScalar, TensorDescriptor, TypeArena, TypeDescriptor, TypeId,
};
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::spelling::Spelling;
use crate::typemap::{Origin, ScalarTypeMap};

/// Prefix of every hashed structure name.
pub const HASH_PREFIX: &str = "struct_";

/// Layout of a descriptor as seen by generated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    /// Ordered `(field name, field canonical name)` pairs.
    Composite(Vec<(String, String)>),
    /// Spelling of a leaf, e.g. `int` or `Vertex *`.
    Spelling(String),
}

/// One generation session: the descriptor arena plus every naming cache.
pub struct StructureGenerator {
    types: TypeArena,
    type_map: Rc<ScalarTypeMap>,
    names: HashMap<TypeId, String>,
    /// Names handed out by renames, to keep them unique.
    renamed: HashMap<String, TypeId>,
    definitions: HashMap<TypeId, Definition>,
    counterparts: HashMap<(TypeId, Origin), Option<TypeId>>,
    pending_renames: Vec<(TypeId, String)>,
    heights: HashMap<TypeId, usize>,
    /// Composites whose hash is being computed.
    naming: HashSet<TypeId>,
    pub(crate) layouts: HashMap<TypeId, Layout>,
    pub(crate) laying_out: HashSet<TypeId>,
}

impl StructureGenerator {
    pub fn new(type_map: Rc<ScalarTypeMap>) -> Self {
        let mut generator = StructureGenerator {
            types: TypeArena::new(),
            type_map,
            names: HashMap::new(),
            renamed: HashMap::new(),
            definitions: HashMap::new(),
            counterparts: HashMap::new(),
            pending_renames: Vec::new(),
            heights: HashMap::new(),
            naming: HashSet::new(),
            layouts: HashMap::new(),
            laying_out: HashSet::new(),
        };
        generator.seed_scalar_names();
        generator
    }

    /// Pre-bind every scalar of every origin to its preferred C spelling.
    fn seed_scalar_names(&mut self) {
        let map = Rc::clone(&self.type_map);
        for (type_name, info) in map.scalars() {
            let descriptor = match type_name.origin {
                Origin::Target => TypeDescriptor::Target(type_name.name.clone()),
                Origin::Tensor => TypeDescriptor::Tensor(TensorDescriptor::Scalar(type_name.name.clone())),
                Origin::Foreign => TypeDescriptor::Foreign(ForeignDescriptor::Scalar(type_name.name.clone())),
                Origin::Host => match HostScalar::from_name(&type_name.name) {
                    Some(scalar) => TypeDescriptor::Host(scalar),
                    None => continue,
                },
            };
            let c_name = match type_name.origin {
                Origin::Target => Some(type_name.name.clone()),
                _ => map.preferred(Origin::Target, *info).map(|t| t.name.clone()),
            };
            if let Some(c_name) = c_name {
                let id = self.types.intern_leaf(descriptor);
                self.names.insert(id, c_name);
            }
        }
        log::trace!("seeded {} scalar names", self.names.len());
    }

    // ── Descriptor construction ─────────────────────────────────────────────

    pub fn types(&self) -> &TypeArena {
        &self.types
    }

    pub fn type_map(&self) -> &ScalarTypeMap {
        &self.type_map
    }

    pub fn descriptor(&self, id: TypeId) -> &TypeDescriptor {
        self.types.get(id)
    }

    pub fn intern(&mut self, descriptor: TypeDescriptor) -> Result<TypeId> {
        self.types.intern(descriptor)
    }

    /// A literal C spelling, e.g. `float` or `Vertex *`.
    pub fn target(&mut self, spelling: &str) -> TypeId {
        self.types.intern_leaf(TypeDescriptor::Target(spelling.to_string()))
    }

    pub fn tensor_scalar(&mut self, name: &str) -> Result<TypeId> {
        self.type_map.type_info(Origin::Tensor, name)?;
        Ok(self
            .types
            .intern_leaf(TypeDescriptor::Tensor(TensorDescriptor::Scalar(name.to_string()))))
    }

    pub fn tensor_struct<I, S>(&mut self, fields: I) -> Result<TypeId>
    where
        I: IntoIterator<Item = (S, TypeId)>,
        S: Into<String>,
    {
        self.types
            .intern(TypeDescriptor::Tensor(TensorDescriptor::Structured(collect_fields(fields))))
    }

    pub fn foreign_scalar(&mut self, name: &str) -> Result<TypeId> {
        self.type_map.type_info(Origin::Foreign, name)?;
        Ok(self
            .types
            .intern_leaf(TypeDescriptor::Foreign(ForeignDescriptor::Scalar(name.to_string()))))
    }

    pub fn foreign_struct<I, S>(&mut self, name: &str, fields: I) -> Result<TypeId>
    where
        I: IntoIterator<Item = (S, TypeId)>,
        S: Into<String>,
    {
        self.types.intern(TypeDescriptor::Foreign(ForeignDescriptor::Structure {
            name: name.to_string(),
            fields: collect_fields(fields),
        }))
    }

    pub fn host(&mut self, scalar: HostScalar) -> TypeId {
        self.types.intern_leaf(TypeDescriptor::Host(scalar))
    }

    pub fn declare_record(&mut self, name: &str) -> TypeId {
        self.types.declare_record(name)
    }

    pub fn define_record<I, S>(&mut self, id: TypeId, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, TypeId)>,
        S: Into<String>,
    {
        self.types.define_record(id, collect_fields(fields))
    }

    /// Declare and define a record in one step.
    pub fn record<I, S>(&mut self, name: &str, fields: I) -> Result<TypeId>
    where
        I: IntoIterator<Item = (S, TypeId)>,
        S: Into<String>,
    {
        let id = self.declare_record(name);
        self.define_record(id, fields)?;
        Ok(id)
    }

    pub fn pointer(&mut self, origin: Origin, pointee: TypeId) -> TypeId {
        self.types.intern_leaf(TypeDescriptor::Pointer { origin, pointee })
    }

    // ── Naming ──────────────────────────────────────────────────────────────

    /// Request that `id` be called `name`. Applied lazily, at the next name
    /// or definition query.
    pub fn rename(&mut self, id: TypeId, name: &str) {
        let request = (id, name.to_string());
        if !self.pending_renames.contains(&request) {
            self.pending_renames.push(request);
        }
    }

    pub fn has_pending_renames(&self) -> bool {
        !self.pending_renames.is_empty()
    }

    pub fn canonical_name(&mut self, id: TypeId) -> Result<String> {
        if let TypeDescriptor::Target(spelling) = self.types.get(id) {
            return Ok(spelling.clone());
        }
        self.execute_pending_renames()?;
        self.name_of(id)
    }

    /// Descriptor that a rename claimed `name` for.
    pub fn renamed_type(&mut self, name: &str) -> Result<Option<TypeId>> {
        self.execute_pending_renames()?;
        Ok(self.renamed.get(name).copied())
    }

    fn name_of(&mut self, id: TypeId) -> Result<String> {
        if let Some(name) = self.names.get(&id) {
            return Ok(name.clone());
        }

        let descriptor = self.types.get(id).clone();
        let name = match &descriptor {
            TypeDescriptor::Target(spelling) => return Ok(spelling.clone()),
            TypeDescriptor::Pointer { pointee, .. } => format!("{} *", self.name_of(*pointee)?),
            TypeDescriptor::Tensor(TensorDescriptor::Scalar(name)) => {
                return Err(unknown(Origin::Tensor, name))
            }
            TypeDescriptor::Foreign(ForeignDescriptor::Scalar(name)) => {
                return Err(unknown(Origin::Foreign, name))
            }
            TypeDescriptor::Host(scalar) => return Err(unknown(Origin::Host, scalar.as_str())),
            TypeDescriptor::Tensor(_) | TypeDescriptor::Foreign(_) | TypeDescriptor::Record(_) => {
                let fields = self.fields_of(id)?.to_vec();
                let tensor = self.counterpart(id, Origin::Tensor)?;
                match tensor.and_then(|t| self.names.get(&t).cloned()) {
                    Some(shared) => shared,
                    None => {
                        let hashed = self.hash_fields(id, &descriptor, &fields)?;
                        // The structural form shares the name, so a later
                        // rename of an equivalent descriptor is a conflict.
                        if let Some(t) = tensor {
                            self.names.entry(t).or_insert_with(|| hashed.clone());
                        }
                        hashed
                    }
                }
            }
        };

        log::trace!("named #{} ({}) '{}'", id.0, descriptor, name);
        self.names.insert(id, name.clone());
        Ok(name)
    }

    fn hash_fields(&mut self, id: TypeId, descriptor: &TypeDescriptor, fields: &[Field]) -> Result<String> {
        if !self.naming.insert(id) {
            return Err(Error::RecursiveType {
                name: descriptor.to_string(),
            });
        }

        let mut hasher = Sha256::new();
        let mut result = Ok(());
        for field in fields {
            match self.name_of(field.ty) {
                Ok(field_name) => {
                    hasher.update(field.name.as_bytes());
                    hasher.update(b"\0");
                    hasher.update(field_name.as_bytes());
                    hasher.update(b"\0");
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.naming.remove(&id);
        result?;

        Ok(format!("{}{}", HASH_PREFIX, bytes_to_hex(&hasher.finalize())))
    }

    /// Apply queued renames, leaves first.
    ///
    /// A hash of a composite embeds its fields' names, so a field type must
    /// be renamed before anything containing it is named. A failing request
    /// is reported and dropped; the requests not yet applied stay queued for
    /// the next query.
    fn execute_pending_renames(&mut self) -> Result<()> {
        if self.pending_renames.is_empty() {
            return Ok(());
        }
        let mut renames = std::mem::take(&mut self.pending_renames).into_iter();

        let mut ordered = Vec::with_capacity(renames.len());
        while let Some((id, name)) = renames.next() {
            match self.height(id) {
                Ok(height) => ordered.push((height, id, name)),
                Err(e) => {
                    let measured = ordered.into_iter().map(|(_, id, name)| (id, name));
                    self.pending_renames.extend(measured.chain(renames));
                    return Err(e);
                }
            }
        }
        ordered.sort_by_key(|(height, _, _)| *height);

        let mut ordered = ordered.into_iter();
        while let Some((_, id, name)) = ordered.next() {
            if let Err(e) = self.apply_rename(id, name) {
                self.pending_renames.extend(ordered.map(|(_, id, name)| (id, name)));
                return Err(e);
            }
        }
        Ok(())
    }

    fn apply_rename(&mut self, id: TypeId, name: String) -> Result<()> {
        let descriptor = self.types.get(id).to_string();
        let conflict = |reason: String| Error::NamingConflict {
            descriptor: descriptor.clone(),
            name: name.clone(),
            reason,
        };

        if matches!(self.types.get(id), TypeDescriptor::Target(_)) {
            return Err(conflict("C spellings are their own names".to_string()));
        }
        if let Some(existing) = self.names.get(&id) {
            return Err(conflict(format!("already named '{existing}'")));
        }
        if let Some(owner) = self.renamed.get(&name) {
            return Err(conflict(format!(
                "name already given to {}",
                self.types.get(*owner)
            )));
        }

        let tensor = self.counterpart(id, Origin::Tensor)?;
        let foreign = self.counterpart(id, Origin::Foreign)?;
        for (origin, form) in [(Origin::Tensor, tensor), (Origin::Foreign, foreign)] {
            if let Some(existing) = form.and_then(|f| self.names.get(&f)) {
                return Err(conflict(format!("{origin} counterpart already named '{existing}'")));
            }
        }

        for target in [Some(id), tensor, foreign].into_iter().flatten() {
            self.names.insert(target, name.clone());
        }
        log::debug!("renamed {} to '{}'", descriptor, name);
        self.renamed.insert(name, id);
        Ok(())
    }

    // ── Structure ───────────────────────────────────────────────────────────

    fn fields_of(&self, id: TypeId) -> Result<&[Field]> {
        match self.subfields(id)? {
            Some(fields) => Ok(fields),
            None => Ok(&[]),
        }
    }

    /// Ordered fields of a composite, `None` for leaves.
    pub fn subfields(&self, id: TypeId) -> Result<Option<&[Field]>> {
        match self.types.get(id) {
            TypeDescriptor::Record(record) if record.fields.is_none() => Err(Error::IncompleteRecord {
                name: record.name.clone(),
            }),
            descriptor => Ok(descriptor.fields()),
        }
    }

    /// What `id` points at, if it is a pointer.
    pub fn pointee(&mut self, id: TypeId) -> Result<Option<TypeId>> {
        match self.types.get(id).clone() {
            TypeDescriptor::Pointer { pointee, .. } => Ok(Some(pointee)),
            TypeDescriptor::Target(text) => {
                let spelling = Spelling::parse(&text)?;
                Ok(spelling.pointee().map(|p| self.target(&p.to_string())))
            }
            _ => Ok(None),
        }
    }

    /// Composite nesting depth, 0 for leaves. Pointers are leaves.
    pub fn height(&mut self, id: TypeId) -> Result<usize> {
        if let Some(&height) = self.heights.get(&id) {
            return Ok(height);
        }
        let children: Option<Vec<TypeId>> = self
            .subfields(id)?
            .map(|fields| fields.iter().map(|f| f.ty).collect());
        let height = match children {
            None => 0,
            Some(children) => {
                let mut max = 0;
                for child in children {
                    max = max.max(self.height(child)?);
                }
                max + 1
            }
        };
        self.heights.insert(id, height);
        Ok(height)
    }

    /// Every composite reachable from `id` through fields (not pointers),
    /// dependencies first, each listed once.
    pub fn reachable_composites(&self, id: TypeId) -> Result<Vec<TypeId>> {
        let mut visited = Vec::new();
        self.visit_subtypes(id, &mut visited)?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for t in visited.into_iter().rev() {
            if seen.insert(t) && self.subfields(t)?.is_some() {
                out.push(t);
            }
        }
        Ok(out)
    }

    fn visit_subtypes(&self, id: TypeId, visited: &mut Vec<TypeId>) -> Result<()> {
        visited.push(id);
        if let Some(fields) = self.subfields(id)? {
            for field in fields {
                self.visit_subtypes(field.ty, visited)?;
            }
        }
        Ok(())
    }

    pub fn definition(&mut self, id: TypeId) -> Result<Definition> {
        if let Some(definition) = self.definitions.get(&id) {
            return Ok(definition.clone());
        }
        let definition = match self.subfields(id)?.map(<[Field]>::to_vec) {
            Some(fields) => {
                let mut pairs = Vec::with_capacity(fields.len());
                for field in fields {
                    pairs.push((field.name, self.canonical_name(field.ty)?));
                }
                Definition::Composite(pairs)
            }
            None => Definition::Spelling(self.canonical_name(id)?),
        };
        self.definitions.insert(id, definition.clone());
        Ok(definition)
    }

    /// `struct` definitions for every composite reachable from `id`, in
    /// emission order.
    pub fn render_structures(&mut self, id: TypeId) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for t in self.reachable_composites(id)? {
            out.push(self.render_structure(t)?);
        }
        Ok(out)
    }

    pub fn render_structure(&mut self, id: TypeId) -> Result<String> {
        let name = self.canonical_name(id)?;
        let mut out = format!("struct {name} {{\n");
        if let Definition::Composite(fields) = self.definition(id)? {
            for (field, ty) in fields {
                let _ = writeln!(out, "    {ty} {field};");
            }
        }
        out.push_str("};");
        Ok(out)
    }

    // ── Counterparts ────────────────────────────────────────────────────────

    /// The equivalent descriptor in the tensor or foreign origin.
    ///
    /// `None` when no equivalent exists: C spellings that are not scalars or
    /// pointers, records that contain themselves, and origins other than
    /// tensor and foreign.
    pub fn counterpart(&mut self, id: TypeId, origin: Origin) -> Result<Option<TypeId>> {
        if !matches!(origin, Origin::Tensor | Origin::Foreign) {
            return Ok(None);
        }
        let mut visiting = HashSet::new();
        self.counterpart_in(id, origin, &mut visiting)
    }

    fn counterpart_in(
        &mut self,
        id: TypeId,
        origin: Origin,
        visiting: &mut HashSet<TypeId>,
    ) -> Result<Option<TypeId>> {
        if let Some(&known) = self.counterparts.get(&(id, origin)) {
            return Ok(known);
        }

        let descriptor = self.types.get(id).clone();
        let result = match &descriptor {
            TypeDescriptor::Tensor(_) if origin == Origin::Tensor => Some(id),
            TypeDescriptor::Foreign(_) if origin == Origin::Foreign => Some(id),
            TypeDescriptor::Tensor(TensorDescriptor::Scalar(name)) => {
                self.scalar_counterpart(Origin::Tensor, name, origin)?
            }
            TypeDescriptor::Foreign(ForeignDescriptor::Scalar(name)) => {
                self.scalar_counterpart(Origin::Foreign, name, origin)?
            }
            TypeDescriptor::Host(scalar) => self.scalar_counterpart(Origin::Host, scalar.as_str(), origin)?,
            TypeDescriptor::Target(text) => {
                let spelling = Spelling::parse(text)?;
                match spelling.pointee() {
                    Some(pointee) => {
                        let pointee = self.target(&pointee.to_string());
                        self.counterpart_in(pointee, origin, visiting)?
                            .map(|p| self.pointer(origin, p))
                    }
                    None if self.type_map.contains(Origin::Target, &spelling.base) => {
                        self.scalar_counterpart(Origin::Target, &spelling.base, origin)?
                    }
                    None => None,
                }
            }
            TypeDescriptor::Pointer { pointee, .. } => self
                .counterpart_in(*pointee, origin, visiting)?
                .map(|p| self.pointer(origin, p)),
            TypeDescriptor::Tensor(TensorDescriptor::Structured(_))
            | TypeDescriptor::Foreign(ForeignDescriptor::Structure { .. })
            | TypeDescriptor::Record(_) => {
                if !visiting.insert(id) {
                    return Ok(None);
                }
                let fields = self.fields_of(id)?.to_vec();
                let mut mapped = Vec::with_capacity(fields.len());
                let mut complete = true;
                for field in fields {
                    match self.counterpart_in(field.ty, origin, visiting)? {
                        Some(ty) => mapped.push(Field::new(field.name, ty)),
                        None => {
                            complete = false;
                            break;
                        }
                    }
                }
                visiting.remove(&id);
                if complete {
                    let form = match origin {
                        Origin::Tensor => TypeDescriptor::Tensor(TensorDescriptor::Structured(mapped)),
                        _ => TypeDescriptor::Foreign(ForeignDescriptor::Structure {
                            name: String::new(),
                            fields: mapped,
                        }),
                    };
                    Some(self.types.intern(form)?)
                } else {
                    None
                }
            }
        };

        self.counterparts.insert((id, origin), result);
        Ok(result)
    }

    fn scalar_counterpart(&mut self, from: Origin, name: &str, to: Origin) -> Result<Option<TypeId>> {
        let Some(target) = self.type_map.counterpart(from, name, to)?.cloned() else {
            return Ok(None);
        };
        let descriptor = match to {
            Origin::Tensor => TypeDescriptor::Tensor(TensorDescriptor::Scalar(target.name)),
            _ => TypeDescriptor::Foreign(ForeignDescriptor::Scalar(target.name)),
        };
        Ok(Some(self.types.intern_leaf(descriptor)))
    }
}

fn collect_fields<I, S>(fields: I) -> Vec<Field>
where
    I: IntoIterator<Item = (S, TypeId)>,
    S: Into<String>,
{
    fields.into_iter().map(|(name, ty)| Field::new(name, ty)).collect()
}

fn unknown(origin: Origin, name: &str) -> Error {
    Error::UnknownScalarType {
        origin,
        name: name.to_string(),
    }
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}
