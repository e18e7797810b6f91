// typemap.rs - Scalar type correspondence across type systems
//
// Builds the table that joins scalar types of every origin on their
// `TypeInfo` (signage, numeric kind, byte size). The master list below is
// ordered by preference: when several names of one origin share a
// `TypeInfo`, the earliest wins.
//
// Preconditions: the size oracle reports every requested target scalar.
// Postconditions: every known scalar of every origin has a `TypeInfo`.
// Failure modes: missing or unexpected oracle entries produce `OracleFailure`.
// Side effects: runs the size oracle once, at construction.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::oracle::{MeasuredScalar, ScalarRequest, SizeOracle};

// ── Data types ──────────────────────────────────────────────────────────────

/// The notation a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// C/C++ type spellings: the system code is generated for.
    Target,
    /// Array element dtypes.
    Tensor,
    /// Foreign-call structure and scalar types.
    Foreign,
    /// Host-native scalars and annotated records.
    Host,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Origin::Target => "C",
            Origin::Tensor => "tensor",
            Origin::Foreign => "foreign",
            Origin::Host => "host",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signage {
    Signed,
    Unsigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericKind {
    Integer,
    Float,
    Pointer,
}

impl Signage {
    pub fn as_str(self) -> &'static str {
        match self {
            Signage::Signed => "signed",
            Signage::Unsigned => "unsigned",
        }
    }
}

impl NumericKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NumericKind::Integer => "integer",
            NumericKind::Float => "float",
            NumericKind::Pointer => "pointer",
        }
    }
}

/// Join key used to match scalar types across origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeInfo {
    pub signage: Signage,
    pub kind: NumericKind,
    pub size: usize,
}

impl TypeInfo {
    pub fn new(signage: Signage, kind: NumericKind, size: usize) -> Self {
        TypeInfo {
            signage,
            kind,
            size,
        }
    }

    /// The info of a data pointer on the host.
    pub fn pointer() -> Self {
        TypeInfo::new(Signage::Unsigned, NumericKind::Pointer, size_of::<*const ()>())
    }
}

/// A scalar name qualified by its origin. Distinguishes identically spelled
/// names (`double` is both a C and a tensor name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeName {
    pub origin: Origin,
    pub name: String,
}

impl TypeName {
    pub fn new(origin: Origin, name: impl Into<String>) -> Self {
        TypeName {
            origin,
            name: name.into(),
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.name)
    }
}

// ── Master list ─────────────────────────────────────────────────────────────

struct ScalarEntry {
    origin: Origin,
    name: &'static str,
    signage: Signage,
    kind: NumericKind,
}

const fn entry(origin: Origin, name: &'static str, signage: Signage, kind: NumericKind) -> ScalarEntry {
    ScalarEntry {
        origin,
        name,
        signage,
        kind,
    }
}

use NumericKind::{Float, Integer};
use Origin::{Foreign, Host, Target, Tensor};
use Signage::{Signed, Unsigned};

// Order reflects preference of names when infos are identical.
const SCALARS: &[ScalarEntry] = &[
    entry(Target, "char", Signed, Integer),
    entry(Target, "float", Signed, Float),
    entry(Target, "double", Signed, Float),
    entry(Target, "int", Signed, Integer),
    entry(Target, "long double", Signed, Float),
    entry(Target, "short", Signed, Integer),
    entry(Target, "long long", Signed, Integer),
    entry(Target, "unsigned char", Unsigned, Integer),
    entry(Target, "unsigned int", Unsigned, Integer),
    entry(Target, "unsigned long long", Unsigned, Integer),
    entry(Target, "unsigned short", Unsigned, Integer),
    entry(Foreign, "c_int8", Signed, Integer),
    entry(Foreign, "c_int16", Signed, Integer),
    entry(Foreign, "c_int32", Signed, Integer),
    entry(Foreign, "c_int64", Signed, Integer),
    entry(Foreign, "c_uint8", Unsigned, Integer),
    entry(Foreign, "c_uint16", Unsigned, Integer),
    entry(Foreign, "c_uint32", Unsigned, Integer),
    entry(Foreign, "c_uint64", Unsigned, Integer),
    entry(Foreign, "c_float", Signed, Float),
    entry(Foreign, "c_double", Signed, Float),
    entry(Foreign, "c_longdouble", Signed, Float),
    entry(Foreign, "c_bool", Unsigned, Integer),
    entry(Foreign, "c_byte", Signed, Integer),
    entry(Foreign, "c_int", Signed, Integer),
    entry(Foreign, "c_long", Signed, Integer),
    entry(Foreign, "c_longlong", Signed, Integer),
    entry(Foreign, "c_short", Signed, Integer),
    entry(Foreign, "c_size_t", Unsigned, Integer),
    entry(Foreign, "c_ssize_t", Signed, Integer),
    entry(Foreign, "c_ubyte", Unsigned, Integer),
    entry(Foreign, "c_uint", Unsigned, Integer),
    entry(Foreign, "c_ulong", Unsigned, Integer),
    entry(Foreign, "c_ulonglong", Unsigned, Integer),
    entry(Foreign, "c_ushort", Unsigned, Integer),
    entry(Tensor, "int8", Signed, Integer),
    entry(Tensor, "int16", Signed, Integer),
    entry(Tensor, "int32", Signed, Integer),
    entry(Tensor, "int64", Signed, Integer),
    entry(Tensor, "float32", Signed, Float),
    entry(Tensor, "float64", Signed, Float),
    entry(Tensor, "float128", Signed, Float),
    entry(Tensor, "uint8", Unsigned, Integer),
    entry(Tensor, "uint16", Unsigned, Integer),
    entry(Tensor, "uint32", Unsigned, Integer),
    entry(Tensor, "uint64", Unsigned, Integer),
    entry(Tensor, "bool_", Unsigned, Integer),
    entry(Tensor, "byte", Signed, Integer),
    entry(Tensor, "double", Signed, Float),
    entry(Tensor, "float_", Signed, Float),
    entry(Tensor, "int_", Signed, Integer),
    entry(Tensor, "intc", Signed, Integer),
    entry(Tensor, "longfloat", Signed, Float),
    entry(Tensor, "longlong", Signed, Integer),
    entry(Tensor, "short", Signed, Integer),
    entry(Tensor, "single", Signed, Float),
    entry(Tensor, "ubyte", Unsigned, Integer),
    entry(Tensor, "uint", Unsigned, Integer),
    entry(Tensor, "uintc", Unsigned, Integer),
    entry(Tensor, "ulonglong", Unsigned, Integer),
    entry(Tensor, "ushort", Unsigned, Integer),
    entry(Host, "bool", Unsigned, Integer),
    entry(Host, "int", Signed, Integer),
    entry(Host, "float", Signed, Float),
];

/// Byte size of the platform `long double`.
#[cfg(all(any(target_arch = "x86_64", target_arch = "aarch64"), not(windows)))]
pub(crate) const LONG_DOUBLE_SIZE: usize = 16;
#[cfg(all(target_arch = "x86", not(windows)))]
pub(crate) const LONG_DOUBLE_SIZE: usize = 12;
#[cfg(not(any(
    all(any(target_arch = "x86_64", target_arch = "aarch64"), not(windows)),
    all(target_arch = "x86", not(windows))
)))]
pub(crate) const LONG_DOUBLE_SIZE: usize = 8;

fn tensor_size(name: &str) -> Option<usize> {
    use std::ffi::{c_int, c_long, c_uint, c_ulong};

    let size = match name {
        "int8" | "uint8" | "bool_" | "byte" | "ubyte" => 1,
        "int16" | "uint16" | "short" | "ushort" => 2,
        "int32" | "uint32" | "float32" | "single" => 4,
        "int64" | "uint64" | "float64" | "double" | "float_" | "longlong" | "ulonglong" => 8,
        "intc" => size_of::<c_int>(),
        "uintc" => size_of::<c_uint>(),
        "int_" => size_of::<c_long>(),
        "uint" => size_of::<c_ulong>(),
        "longfloat" => LONG_DOUBLE_SIZE,
        // Only exists where `long double` is padded to 16 bytes.
        "float128" if LONG_DOUBLE_SIZE == 16 => 16,
        _ => return None,
    };
    Some(size)
}

fn foreign_size(name: &str) -> Option<usize> {
    use std::ffi::{
        c_int, c_long, c_longlong, c_short, c_uint, c_ulong, c_ulonglong, c_ushort,
    };

    let size = match name {
        "c_int8" | "c_uint8" | "c_bool" | "c_byte" | "c_ubyte" => 1,
        "c_int16" | "c_uint16" => 2,
        "c_int32" | "c_uint32" | "c_float" => 4,
        "c_int64" | "c_uint64" | "c_double" => 8,
        "c_longdouble" => LONG_DOUBLE_SIZE,
        "c_int" => size_of::<c_int>(),
        "c_long" => size_of::<c_long>(),
        "c_longlong" => size_of::<c_longlong>(),
        "c_short" => size_of::<c_short>(),
        "c_size_t" => size_of::<usize>(),
        "c_ssize_t" => size_of::<isize>(),
        "c_uint" => size_of::<c_uint>(),
        "c_ulong" => size_of::<c_ulong>(),
        "c_ulonglong" => size_of::<c_ulonglong>(),
        "c_ushort" => size_of::<c_ushort>(),
        _ => return None,
    };
    Some(size)
}

/// The tensor scalar a host scalar is stored as.
fn host_storage(name: &str) -> Option<&'static str> {
    match name {
        "bool" => Some("bool_"),
        "int" => Some("int_"),
        "float" => Some("float_"),
        _ => None,
    }
}

// ── Scalar type map ─────────────────────────────────────────────────────────

/// Correspondence between the scalars of every origin.
///
/// Built once per process (the target side requires running the size
/// oracle) and shared between generation sessions.
#[derive(Debug)]
pub struct ScalarTypeMap {
    infos: HashMap<TypeName, TypeInfo>,
    rank: HashMap<TypeName, usize>,
    preferred: HashMap<(Origin, TypeInfo), TypeName>,
}

impl ScalarTypeMap {
    pub fn new(oracle: &dyn SizeOracle) -> Result<Self> {
        let requests: Vec<ScalarRequest> = SCALARS
            .iter()
            .filter(|s| s.origin == Origin::Target)
            .map(|s| ScalarRequest {
                name: s.name.to_string(),
                signage: s.signage,
                kind: s.kind,
            })
            .collect();

        let measured = oracle.measure(&requests)?;
        let mut infos = HashMap::new();
        let mut rank = HashMap::new();

        for MeasuredScalar(name, signage, kind, size) in measured {
            if !requests.iter().any(|r| r.name == name) {
                return Err(Error::OracleFailure {
                    message: format!("unexpected type '{name}' in report"),
                });
            }
            infos.insert(TypeName::new(Origin::Target, name), TypeInfo::new(signage, kind, size));
        }

        for (index, s) in SCALARS.iter().enumerate() {
            let size = match s.origin {
                Origin::Target => {
                    if !infos.contains_key(&TypeName::new(Origin::Target, s.name)) {
                        return Err(Error::OracleFailure {
                            message: format!("no size reported for '{}'", s.name),
                        });
                    }
                    rank.insert(TypeName::new(s.origin, s.name), index);
                    continue;
                }
                Origin::Tensor => tensor_size(s.name),
                Origin::Foreign => foreign_size(s.name),
                Origin::Host => host_storage(s.name).and_then(tensor_size),
            };

            let Some(size) = size else {
                continue;
            };

            let name = TypeName::new(s.origin, s.name);
            infos.insert(name.clone(), TypeInfo::new(s.signage, s.kind, size));
            rank.insert(name, index);
        }

        let mut preferred: HashMap<(Origin, TypeInfo), TypeName> = HashMap::new();
        for (name, info) in &infos {
            let key = (name.origin, *info);
            let better = preferred
                .get(&key)
                .map_or(true, |current| rank[name] < rank[current]);
            if better {
                preferred.insert(key, name.clone());
            }
        }

        log::debug!("scalar type map: {} scalars across all origins", infos.len());

        Ok(ScalarTypeMap {
            infos,
            rank,
            preferred,
        })
    }

    /// `TypeInfo` of a scalar in the given origin.
    pub fn type_info(&self, origin: Origin, name: &str) -> Result<TypeInfo> {
        self.infos
            .get(&TypeName::new(origin, name))
            .copied()
            .ok_or_else(|| Error::UnknownScalarType {
                origin,
                name: name.to_string(),
            })
    }

    pub fn contains(&self, origin: Origin, name: &str) -> bool {
        self.infos.contains_key(&TypeName::new(origin, name))
    }

    /// The best-named representative in `origin` for every `TypeInfo`
    /// observed in that origin.
    pub fn correspondence(&self, origin: Origin) -> BTreeMap<TypeInfo, TypeName> {
        self.preferred
            .iter()
            .filter(|((o, _), _)| *o == origin)
            .map(|((_, info), name)| (*info, name.clone()))
            .collect()
    }

    /// The preferred name in `origin` for a `TypeInfo`, if that origin has one.
    pub fn preferred(&self, origin: Origin, info: TypeInfo) -> Option<&TypeName> {
        self.preferred.get(&(origin, info))
    }

    /// Translate a scalar of one origin into the preferred name of another.
    ///
    /// `Ok(None)` means the scalar is known but `to` has no scalar of the
    /// same size and kind.
    pub fn counterpart(&self, from: Origin, name: &str, to: Origin) -> Result<Option<&TypeName>> {
        let info = self.type_info(from, name)?;
        Ok(self.preferred(to, info))
    }

    /// All known scalars, in preference order.
    pub fn scalars(&self) -> impl Iterator<Item = (&TypeName, &TypeInfo)> {
        let mut entries: Vec<_> = self.infos.iter().collect();
        entries.sort_by_key(|(name, _)| self.rank.get(*name).copied().unwrap_or(usize::MAX));
        entries.into_iter()
    }
}
