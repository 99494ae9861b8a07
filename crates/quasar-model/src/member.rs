//! Method, field, parameter, and local references.

use std::fmt;

use crate::name::Name;
use crate::types::TypeRef;

/// A reference to a method in the external symbol model.
///
/// Identity is structural: two references to the same method compare and
/// hash equal, which is what call-graph nodes and per-method caches key on.
/// Shared as `Arc<MethodRef>` throughout the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub containing_type: TypeRef,
    pub name: Name,
    /// Declared parameter types, excluding the implicit receiver.
    pub parameters: Vec<TypeRef>,
    /// Trailing vararg-sentinel parameter types, if any.
    pub extra_parameters: Vec<TypeRef>,
    pub return_type: TypeRef,
    pub is_static: bool,
    pub is_virtual: bool,
}

impl MethodRef {
    /// Total number of stack arguments a call site pops for this method,
    /// including the implicit receiver for instance methods.
    #[must_use]
    pub fn argument_count(&self) -> usize {
        let implicit = usize::from(!self.is_static);
        implicit + self.parameters.len() + self.extra_parameters.len()
    }

    #[must_use]
    pub fn has_result(&self) -> bool {
        !self.return_type.is_void()
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}::{}(",
            self.return_type, self.containing_type, self.name
        )?;
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// A reference to a field in the external symbol model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub containing_type: TypeRef,
    pub name: Name,
    pub ty: TypeRef,
    pub is_static: bool,
}

impl FieldRef {
    /// The textual member signature with the containing type omitted.
    ///
    /// Field edges in the points-to graph are keyed by this string so that
    /// field identity is stable across assemblies that reference the same
    /// member through different resolution paths.
    #[must_use]
    pub fn member_signature(&self) -> Name {
        Name::member_signature(&self.ty, &self.name)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.ty, self.containing_type, self.name)
    }
}

/// A declared parameter of a method definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDef {
    pub index: u16,
    pub name: Name,
    pub ty: TypeRef,
}

/// A declared local variable of a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDef {
    pub name: Name,
    pub ty: TypeRef,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveType;

    #[test]
    fn member_signature_omits_the_containing_type() {
        let field = FieldRef {
            containing_type: TypeRef::named("Box"),
            name: Name::new("value"),
            ty: TypeRef::Primitive(PrimitiveType::Int32),
            is_static: false,
        };
        assert_eq!(field.member_signature().as_str(), "Int32 value");
    }

    #[test]
    fn argument_count_includes_the_receiver() {
        let method = MethodRef {
            containing_type: TypeRef::named("T"),
            name: Name::new("m"),
            parameters: vec![TypeRef::Primitive(PrimitiveType::Int32)],
            extra_parameters: vec![TypeRef::named("Object")],
            return_type: TypeRef::Void,
            is_static: false,
            is_virtual: false,
        };
        assert_eq!(method.argument_count(), 3);
        assert!(!method.has_result());
    }
}
