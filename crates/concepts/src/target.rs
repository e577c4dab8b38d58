use serde::Serialize;
use std::fmt::{self, Display};
use url::Url;

const SUPPORTED_SCHEMES: [&str; 2] = ["http", "https"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid URI format: {0}")]
    InvalidFormat(String),
    #[error("only http:// and https:// URIs are supported, got `{0}`")]
    UnsupportedScheme(String),
    #[error("URI must contain a host component")]
    MissingHost,
}

/// The URI notifications are posted to.
///
/// Either absent, or an absolute `http`/`https` URI with a non-empty host.
/// The text is kept as supplied (after trimming), it is not normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct NotificationTarget(Option<String>);

impl NotificationTarget {
    pub const ABSENT: NotificationTarget = NotificationTarget(None);

    /// Validate a candidate target. Blank input yields an absent target.
    pub fn parse(candidate: &str) -> Result<Self, ValidationError> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return Ok(Self::ABSENT);
        }
        parse_uri(candidate)?;
        Ok(Self(Some(candidate.to_string())))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }
}

impl Display for NotificationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(uri) => f.write_str(uri),
            None => f.write_str("<absent>"),
        }
    }
}

/// Source of the current target, consulted before every delivery attempt.
pub trait TargetSource: Send + Sync {
    fn current_target(&self) -> NotificationTarget;
}

/// Check a candidate without storing it, e.g. for form feedback.
pub fn check_target_uri(candidate: &str) -> Result<(), ValidationError> {
    NotificationTarget::parse(candidate).map(drop)
}

fn is_supported_scheme(scheme: &str) -> bool {
    SUPPORTED_SCHEMES
        .iter()
        .any(|supported| supported.eq_ignore_ascii_case(scheme))
}

fn parse_uri(candidate: &str) -> Result<Url, ValidationError> {
    let url = match Url::parse(candidate) {
        Ok(url) => url,
        Err(url::ParseError::EmptyHost) => {
            // Report the scheme first, `ftp://` is not a missing host problem.
            return match candidate.split_once(':') {
                Some((scheme, _)) if !is_supported_scheme(scheme) => {
                    Err(ValidationError::UnsupportedScheme(scheme.to_string()))
                }
                _ => Err(ValidationError::MissingHost),
            };
        }
        Err(err) => return Err(ValidationError::InvalidFormat(err.to_string())),
    };
    if !is_supported_scheme(url.scheme()) {
        return Err(ValidationError::UnsupportedScheme(url.scheme().to_string()));
    }
    // The parser is lenient with `http:host` and `http:///host`, both lack an authority.
    if url.host_str().is_none_or(str::is_empty) || !has_authority(candidate) {
        return Err(ValidationError::MissingHost);
    }
    Ok(url)
}

fn has_authority(candidate: &str) -> bool {
    let Some((_, rest)) = candidate.split_once(':') else {
        return false;
    };
    let Some(rest) = rest.strip_prefix("//") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_userinfo, host)| host);
    !host.is_empty() && !host.starts_with(':')
}
