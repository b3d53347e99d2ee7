//! Validation helpers for identity protocol inputs.
//!
//! Checks the connection attributes a caller hands to `login` before they are
//! sent to the identity server: start URL, SSO region and registration scopes.

/// Validation error types for protocol inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required field is empty
    EmptyField { field: &'static str },
    /// Start URL is not an absolute https URL
    InvalidStartUrl { url: String },
    /// Region does not look like `xx-name-N`
    InvalidRegion { region: String },
    /// A scope contains whitespace
    InvalidScope { scope: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField { field } => write!(f, "required field '{}' is empty", field),
            Self::InvalidStartUrl { url } => {
                write!(f, "start URL '{}' must be an absolute https:// URL", url)
            }
            Self::InvalidRegion { region } => write!(f, "'{}' is not a valid region", region),
            Self::InvalidScope { scope } => write!(f, "scope '{}' contains whitespace", scope),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate an SSO start URL.
pub fn validate_start_url(url: &str) -> Result<(), ValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ValidationError::EmptyField { field: "start_url" });
    }
    let rest = url
        .strip_prefix("https://")
        .ok_or_else(|| ValidationError::InvalidStartUrl { url: url.to_string() })?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(ValidationError::InvalidStartUrl { url: url.to_string() });
    }
    Ok(())
}

/// Validate an SSO region such as `us-east-1` or `us-gov-west-1`.
pub fn validate_region(region: &str) -> Result<(), ValidationError> {
    if region.is_empty() {
        return Err(ValidationError::EmptyField { field: "region" });
    }
    let parts: Vec<&str> = region.split('-').collect();
    let well_formed = parts.len() >= 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()))
        && parts
            .last()
            .map(|p| p.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
    if !well_formed {
        return Err(ValidationError::InvalidRegion { region: region.to_string() });
    }
    Ok(())
}

/// Validate registration scopes. At least one scope is required.
pub fn validate_scopes<S: AsRef<str>>(scopes: &[S]) -> Result<(), ValidationError> {
    if scopes.is_empty() {
        return Err(ValidationError::EmptyField { field: "scopes" });
    }
    for scope in scopes {
        let scope = scope.as_ref();
        if scope.is_empty() {
            return Err(ValidationError::EmptyField { field: "scopes" });
        }
        if scope.contains(char::is_whitespace) {
            return Err(ValidationError::InvalidScope { scope: scope.to_string() });
        }
    }
    Ok(())
}
