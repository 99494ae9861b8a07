//! Compact type references.
//!
//! The engine never inspects type structure beyond what conversion lowering
//! and reference-ness checks require; full hierarchy knowledge stays with the
//! host, which resolves method implementations against its own class model.

use std::fmt;

use crate::name::Name;

/// Platform primitive types, used by conversion lowering where the opcode
/// alone determines the target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    IntPtr,
    Int8,
    Int16,
    Int32,
    Int64,
    UIntPtr,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl PrimitiveType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            PrimitiveType::IntPtr => "IntPtr",
            PrimitiveType::Int8 => "Int8",
            PrimitiveType::Int16 => "Int16",
            PrimitiveType::Int32 => "Int32",
            PrimitiveType::Int64 => "Int64",
            PrimitiveType::UIntPtr => "UIntPtr",
            PrimitiveType::UInt8 => "UInt8",
            PrimitiveType::UInt16 => "UInt16",
            PrimitiveType::UInt32 => "UInt32",
            PrimitiveType::UInt64 => "UInt64",
            PrimitiveType::Float32 => "Float32",
            PrimitiveType::Float64 => "Float64",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A reference to a type in the external symbol model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Void,
    Primitive(PrimitiveType),
    /// A named class or interface type, identified by its qualified name.
    Named(Name),
    Array {
        elem: Box<TypeRef>,
        rank: u8,
    },
    /// A managed pointer (byref). Not a heap reference for points-to
    /// purposes.
    Pointer(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<Name>) -> Self {
        TypeRef::Named(name.into())
    }

    /// Whether values of this type live on the heap, i.e. whether the
    /// points-to analysis tracks them.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, TypeRef::Named(_) | TypeRef::Array { .. })
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Void)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Void => f.write_str("Void"),
            TypeRef::Primitive(p) => write!(f, "{p}"),
            TypeRef::Named(name) => write!(f, "{name}"),
            TypeRef::Array { elem, rank } => {
                write!(f, "{elem}[")?;
                for _ in 1..*rank {
                    f.write_str(",")?;
                }
                f.write_str("]")
            }
            TypeRef::Pointer(inner) => write!(f, "{inner}&"),
        }
    }
}

impl From<PrimitiveType> for TypeRef {
    fn from(value: PrimitiveType) -> Self {
        TypeRef::Primitive(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_ness_tracks_heap_types() {
        assert!(TypeRef::named("System.String").is_reference());
        assert!(TypeRef::Array {
            elem: Box::new(TypeRef::Primitive(PrimitiveType::Int32)),
            rank: 1,
        }
        .is_reference());
        assert!(!TypeRef::Primitive(PrimitiveType::Int32).is_reference());
        assert!(!TypeRef::Pointer(Box::new(TypeRef::named("T"))).is_reference());
        assert!(TypeRef::Void.is_void());
    }

    #[test]
    fn display_matches_metadata_conventions() {
        let matrix = TypeRef::Array {
            elem: Box::new(TypeRef::named("T")),
            rank: 2,
        };
        assert_eq!(matrix.to_string(), "T[,]");
        assert_eq!(
            TypeRef::Pointer(Box::new(TypeRef::Primitive(PrimitiveType::Int64))).to_string(),
            "Int64&"
        );
    }
}
