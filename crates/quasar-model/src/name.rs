//! Identifier strings.
//!
//! Bytecode metadata is dominated by short, heavily repeated identifiers:
//! method and field names, local names, and the pseudo-names the analyses
//! reserve for themselves (`$result`, the `[]` element field). `Name` keeps
//! all of them cheap to clone and hash by wrapping [`smol_str::SmolStr`],
//! which stores short strings inline.

use std::fmt;

use smol_str::SmolStr;

#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Name(SmolStr);

impl Name {
    #[inline]
    pub fn new(text: impl Into<SmolStr>) -> Self {
        Self(text.into())
    }

    /// The `"<type> <member>"` form that keys field edges in the points-to
    /// graph: member identity with the containing type omitted, so the same
    /// member resolved through different paths compares equal.
    pub fn member_signature(ty: impl fmt::Display, member: impl fmt::Display) -> Self {
        Self(SmolStr::new(format!("{ty} {member}")))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({:?})", self.as_str())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Name {
    fn from(text: &str) -> Self {
        Name::new(text)
    }
}

impl From<String> for Name {
    fn from(text: String) -> Self {
        Name::new(text)
    }
}
