use super::ResourceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const SCHEME: &str = "resource://";

/// A validated `resource://<provider>/<path>` URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceUri {
    provider: String,
    path: String,
}

impl ResourceUri {
    pub fn new(provider: impl Into<String>, path: impl Into<String>) -> Result<Self, ResourceError> {
        let provider = provider.into();
        let path = path.into();
        Self::parse(&format!("{}{}/{}", SCHEME, provider, path))
    }

    pub fn parse(raw: &str) -> Result<Self, ResourceError> {
        let invalid = |reason: &str| ResourceError::InvalidUri {
            uri: raw.to_string(),
            reason: reason.to_string(),
        };

        let rest = raw
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid("expected the resource:// scheme"))?;
        let (provider, path) = rest
            .split_once('/')
            .ok_or_else(|| invalid("missing resource path"))?;

        if provider.is_empty() {
            return Err(invalid("missing provider"));
        }
        if !provider
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid("provider may only contain letters, digits, '-', '_' and '.'"));
        }
        if path.is_empty() {
            return Err(invalid("missing resource path"));
        }
        if path.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(invalid("path contains whitespace or control characters"));
        }

        Ok(Self {
            provider: provider.to_string(),
            path: path.to_string(),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.provider, self.path)
    }
}

impl FromStr for ResourceUri {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceUri {
    type Error = ResourceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceUri> for String {
    fn from(uri: ResourceUri) -> Self {
        uri.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let uri = ResourceUri::parse("resource://files/docs/readme.md").unwrap();
        assert_eq!(uri.provider(), "files");
        assert_eq!(uri.path(), "docs/readme.md");
        assert_eq!(uri.to_string(), "resource://files/docs/readme.md");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "http://files/readme.md",
            "resource://",
            "resource://files",
            "resource://files/",
            "resource:///readme.md",
            "resource://fi les/readme.md",
            "resource://files/read me.md",
            "files/readme.md",
        ] {
            assert!(
                matches!(ResourceUri::parse(raw), Err(ResourceError::InvalidUri { .. })),
                "{}",
                raw
            );
        }
    }

    #[test]
    fn test_serde_validates() {
        let uri: ResourceUri = serde_json::from_str(r#""resource://mem/a""#).unwrap();
        assert_eq!(uri.path(), "a");
        assert!(serde_json::from_str::<ResourceUri>(r#""nope""#).is_err());
    }
}
