use std::fmt;
use thiserror::Error;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";

/// A pullable image reference, e.g. `acme/app`, `acme/app:v2` or `registry.example.com:5000/team/app:1.0`.
#[derive(Debug, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname credentials are looked up by; `docker.io` when the reference has none
    pub registry: String,
    /// Everything before the tag, exactly as written, used as the pull's from-image
    pub name: String,
    pub tag: String,
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("repository is missing")]
    MissingRepository,
    #[error("tag is missing")]
    MissingTag,
    #[error("invalid image format: {0}")]
    InvalidFormat(String),
    #[error("digest references are not allowed")]
    DigestNotAllowed,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::MissingRepository);
        }
        // pulls go by tag, webhooks never carry digests
        if s.contains('@') {
            return Err(ParseError::DigestNotAllowed);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(ParseError::InvalidFormat(s.to_string()));
        }

        // a colon after the last slash is a tag separator, before it a registry port
        let last_slash = s.rfind('/');
        let (name, tag) = match s.rfind(':') {
            Some(pos) if last_slash.is_none_or(|slash| pos > slash) => {
                let tag = &s[pos + 1..];
                if tag.is_empty() {
                    return Err(ParseError::MissingTag);
                }
                (&s[..pos], tag)
            }
            _ => (s, DEFAULT_TAG),
        };

        if name.is_empty() || name.ends_with('/') || name.split('/').any(str::is_empty) {
            return Err(match name.is_empty() {
                true => ParseError::MissingRepository,
                false => ParseError::InvalidFormat(s.to_string()),
            });
        }

        let registry = match name.split_once('/') {
            Some((first, _)) if is_registry_host(first) => first,
            _ => DEFAULT_REGISTRY,
        };

        Ok(Self {
            registry: registry.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }
}

// Same rule the docker CLI applies to decide if the first path component is a hostname
fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}
