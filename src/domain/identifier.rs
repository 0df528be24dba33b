use std::fmt;
use std::str::FromStr;

use super::AppError;

/// A `publisher.extension-name` pair naming one marketplace package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionId {
    pub publisher: String,
    pub name: String,
}

impl ExtensionId {
    /// Names with more than one dot are rejected, even though some real
    /// extension names contain dots.
    pub fn parse(identifier: &str) -> Result<Self, AppError> {
        let parts: Vec<&str> = identifier.split('.').collect();
        match parts.as_slice() {
            [publisher, name] if !publisher.is_empty() && !name.is_empty() => Ok(Self {
                publisher: publisher.to_string(),
                name: name.to_string(),
            }),
            _ => Err(AppError::InvalidIdentifier(identifier.to_string())),
        }
    }

    pub fn filename(&self, version: &str) -> String {
        format!("{}.{}-{}.vsix", self.publisher, self.name, version)
    }
}

impl FromStr for ExtensionId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.publisher, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let id = ExtensionId::parse("ms-python.python").unwrap();
        assert_eq!(id.publisher, "ms-python");
        assert_eq!(id.name, "python");
        assert_eq!(id.to_string(), "ms-python.python");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "python", ".python", "ms-python.", ".", "a.b.c"] {
            assert_eq!(
                ExtensionId::parse(bad),
                Err(AppError::InvalidIdentifier(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_filename() {
        let id: ExtensionId = "esbenp.prettier-vscode".parse().unwrap();
        assert_eq!(id.filename("10.1.0"), "esbenp.prettier-vscode-10.1.0.vsix");
    }
}
