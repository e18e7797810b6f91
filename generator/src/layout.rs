// layout.rs - Byte layout of descriptors under C rules
//
// Scalars are aligned to the largest power of two dividing their size,
// pointers take the host pointer width, composite fields sit at the next
// multiple of their alignment and the total size is rounded up to the
// composite's alignment.
//
// Failure modes: a C spelling that is neither a scalar, a pointer nor a
//                renamed structure produces `UnknownScalarType`; a composite
//                that contains itself by value, directly or through a
//                renamed spelling, produces `SelfContainingRecord`.
// Side effects: caches layouts in the session.

use crate::descriptor::{ForeignDescriptor, TensorDescriptor, TypeDescriptor, TypeId};
use crate::error::{Error, Result};
use crate::spelling::Spelling;
use crate::structure::StructureGenerator;
use crate::typemap::{Origin, TypeInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: TypeId,
    pub offset: usize,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub size: usize,
    pub align: usize,
    /// Empty for leaves.
    pub fields: Vec<FieldLayout>,
}

impl Layout {
    fn scalar(info: TypeInfo) -> Self {
        Layout {
            size: info.size,
            align: scalar_align(info.size),
            fields: Vec::new(),
        }
    }
}

/// Largest power of two dividing `size`; `size` itself for the usual widths.
fn scalar_align(size: usize) -> usize {
    if size == 0 {
        1
    } else {
        1 << size.trailing_zeros()
    }
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

impl StructureGenerator {
    pub fn layout(&mut self, id: TypeId) -> Result<Layout> {
        if let Some(layout) = self.layouts.get(&id) {
            return Ok(layout.clone());
        }

        let descriptor = self.descriptor(id).clone();
        let layout = match &descriptor {
            TypeDescriptor::Pointer { .. } => Layout::scalar(TypeInfo::pointer()),
            TypeDescriptor::Target(text) => self.spelling_layout(text)?,
            TypeDescriptor::Tensor(TensorDescriptor::Scalar(name)) => {
                Layout::scalar(self.type_map().type_info(Origin::Tensor, name)?)
            }
            TypeDescriptor::Foreign(ForeignDescriptor::Scalar(name)) => {
                Layout::scalar(self.type_map().type_info(Origin::Foreign, name)?)
            }
            TypeDescriptor::Host(scalar) => {
                Layout::scalar(self.type_map().type_info(Origin::Host, scalar.as_str())?)
            }
            TypeDescriptor::Tensor(_) | TypeDescriptor::Foreign(_) | TypeDescriptor::Record(_) => {
                if !self.laying_out.insert(id) {
                    return Err(Error::SelfContainingRecord {
                        name: descriptor.to_string(),
                    });
                }
                let result = self.composite_layout(id);
                self.laying_out.remove(&id);
                result?
            }
        };

        self.layouts.insert(id, layout.clone());
        Ok(layout)
    }

    fn composite_layout(&mut self, id: TypeId) -> Result<Layout> {
        let fields = self.subfields(id)?.map(<[_]>::to_vec).unwrap_or_default();

        let mut offset = 0;
        let mut align = 1;
        let mut placed = Vec::with_capacity(fields.len());
        for field in fields {
            let inner = self.layout(field.ty)?;
            offset = round_up(offset, inner.align);
            placed.push(FieldLayout {
                name: field.name,
                ty: field.ty,
                offset,
                size: inner.size,
            });
            offset += inner.size;
            align = align.max(inner.align);
        }

        Ok(Layout {
            size: round_up(offset, align),
            align,
            fields: placed,
        })
    }

    fn spelling_layout(&mut self, text: &str) -> Result<Layout> {
        let spelling = Spelling::parse(text)?;
        if spelling.is_pointer() {
            return Ok(Layout::scalar(TypeInfo::pointer()));
        }
        if self.type_map().contains(Origin::Target, &spelling.base) {
            return Ok(Layout::scalar(self.type_map().type_info(Origin::Target, &spelling.base)?));
        }
        match self.renamed_type(&spelling.base)? {
            Some(named) => self.layout(named),
            None => Err(Error::UnknownScalarType {
                origin: Origin::Target,
                name: spelling.base,
            }),
        }
    }
}
