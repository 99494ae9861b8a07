//! Host traits: the seam between the engine and the external symbol model.

use std::sync::Arc;

use crate::member::MethodRef;
use crate::method::MethodDef;
use crate::name::Name;
use crate::types::TypeRef;

/// Capabilities the analysis engine needs from the surrounding program
/// model. The host owns metadata decoding and the class hierarchy; the
/// engine only ever sees it through this trait.
pub trait ProgramHost {
    /// Look up the definition (and body) behind a method reference.
    /// `None` means the method is external or otherwise unresolvable.
    fn method_def(&self, method: &MethodRef) -> Option<Arc<MethodDef>>;

    /// Resolve the implementation a virtual call dispatches to when the
    /// receiver's runtime type is `receiver_type`.
    fn find_method_implementation(
        &self,
        receiver_type: &TypeRef,
        callee: &MethodRef,
    ) -> Option<Arc<MethodRef>>;

    /// Source-level name for a local, when debug information provides one.
    /// Defaults to `None`, in which case the raw metadata name is used.
    fn local_source_name(&self, method: &MethodRef, local_index: u16) -> Option<Name> {
        let _ = (method, local_index);
        None
    }
}
