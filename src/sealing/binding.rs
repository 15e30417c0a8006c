//! # Binding Identity
//!
//! The identity a sealed value is authenticated against. A blob sealed for
//! `ns-a/secret-x` fails authentication anywhere else.

use std::fmt;

/// How tightly a sealed value is tied to its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SealingScope {
    /// Bound to namespace, name and type
    #[default]
    Strict,
    /// Bound to namespace and type; may be renamed within the namespace
    NamespaceWide,
    /// Bound to type only
    ClusterWide,
}

impl SealingScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SealingScope::Strict => "strict",
            SealingScope::NamespaceWide => "namespace-wide",
            SealingScope::ClusterWide => "cluster-wide",
        }
    }
}

impl fmt::Display for SealingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace, name and type of the plaintext a blob is derived from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingIdentity {
    pub namespace: String,
    pub name: String,
    pub secret_type: String,
    pub scope: SealingScope,
}

impl BindingIdentity {
    /// Bytes authenticated alongside every sealed field
    ///
    /// Components the scope does not bind are left empty, so a strict blob and
    /// a namespace-wide blob for the same resource never share associated data.
    pub fn associated_data(&self) -> Vec<u8> {
        let (namespace, name) = match self.scope {
            SealingScope::Strict => (self.namespace.as_str(), self.name.as_str()),
            SealingScope::NamespaceWide => (self.namespace.as_str(), ""),
            SealingScope::ClusterWide => ("", ""),
        };
        format!(
            "{}\n{}\n{}\n{}",
            self.scope.as_str(),
            namespace,
            name,
            self.secret_type
        )
        .into_bytes()
    }
}

impl fmt::Display for BindingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}, {})",
            self.namespace, self.name, self.secret_type, self.scope
        )
    }
}
