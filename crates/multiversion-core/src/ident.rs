use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque token naming one source version (e.g. one release of a dependency).
///
/// Ids carry no semantic ordering. The derived `Ord` is plain lexicographic
/// order and is only used to keep version sets deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id with every character outside `[A-Za-z0-9_]` replaced by `_`,
    /// usable inside a member name.
    pub fn tag(&self) -> String {
        sanitize(&self.0)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for VersionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Binary (internal, `/`-separated) class name shared by every version of a
/// class. This is the grouping key for merge and split.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassIdentity(String);

pub const OBJECT_CLASS: &str = "java/lang/Object";

impl ClassIdentity {
    /// Accepts either internal (`a/b/C`) or dotted (`a.b.C`) names.
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        if name.contains('.') {
            Self(name.replace('.', "/"))
        } else {
            Self(name)
        }
    }

    pub fn object() -> Self {
        Self(OBJECT_CLASS.to_string())
    }

    pub fn is_object(&self) -> bool {
        self.0 == OBJECT_CLASS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `com/example/ClassA` -> `com_example_ClassA`.
    pub fn flattened(&self) -> String {
        sanitize(&self.0)
    }

    /// Field descriptor of this class type, `Lcom/example/ClassA;`.
    pub fn descriptor(&self) -> String {
        format!("L{};", self.0)
    }
}

impl fmt::Display for ClassIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Visibility levels ordered from most to least restrictive, so that the
/// derived `Ord` makes `max` the widest level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Package,
    Protected,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Package => "package",
            Visibility::Protected => "protected",
            Visibility::Public => "public",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown visibility `{0}`")]
pub struct UnknownVisibility(pub String);

impl FromStr for Visibility {
    type Err = UnknownVisibility;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "public" => Ok(Visibility::Public),
            "protected" => Ok(Visibility::Protected),
            // package-private has no keyword in source form
            "package" | "" => Ok(Visibility::Package),
            "private" => Ok(Visibility::Private),
            other => Err(UnknownVisibility(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_order_is_widening() {
        assert!(Visibility::Public > Visibility::Protected);
        assert!(Visibility::Protected > Visibility::Package);
        assert!(Visibility::Package > Visibility::Private);
        let widest = [Visibility::Private, Visibility::Protected, Visibility::Package]
            .into_iter()
            .max();
        assert_eq!(widest, Some(Visibility::Protected));
    }

    #[test]
    fn test_visibility_parse() {
        assert_eq!("public".parse::<Visibility>(), Ok(Visibility::Public));
        assert_eq!("".parse::<Visibility>(), Ok(Visibility::Package));
        assert!("friend".parse::<Visibility>().is_err());
    }

    #[test]
    fn test_identity_normalizes_dots() {
        let id = ClassIdentity::new("com.example.ClassA");
        assert_eq!(id.as_str(), "com/example/ClassA");
        assert_eq!(id.flattened(), "com_example_ClassA");
        assert_eq!(id.descriptor(), "Lcom/example/ClassA;");
    }

    #[test]
    fn test_version_tag_sanitizes() {
        assert_eq!(VersionId::new("1.20.4-fabric").tag(), "1_20_4_fabric");
        assert_eq!(VersionId::new("a").tag(), "a");
    }
}
