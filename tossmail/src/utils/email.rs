use crate::error::{Result, TossmailError};

/// Basic email validation
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(TossmailError::InvalidEmail("Email is empty".to_string()));
    }

    if !email.contains('@') {
        return Err(TossmailError::InvalidEmail(
            "Email must contain @".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(TossmailError::InvalidEmail(
            "Invalid email format".to_string(),
        ));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(TossmailError::InvalidEmail(
            "Email parts cannot be empty".to_string(),
        ));
    }

    if !domain.contains('.') {
        return Err(TossmailError::InvalidEmail(
            "Domain must contain a dot".to_string(),
        ));
    }

    Ok(())
}

/// Split an address into its lowercased local part and domain.
///
/// All address matching in the service is case-insensitive, so both
/// halves are normalized here and never anywhere else.
pub fn split_address(address: &str) -> Result<(String, String)> {
    let address = address.trim();
    validate_email(address)?;

    // validate_email guarantees exactly one '@'
    let (local, domain) = address
        .split_once('@')
        .ok_or_else(|| TossmailError::InvalidEmail("Email must contain @".to_string()))?;

    Ok((local.to_lowercase(), domain.to_lowercase()))
}

/// Validate a bare domain name for provisioning.
pub fn validate_domain_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TossmailError::InvalidInput(
            "Domain name is empty".to_string(),
        ));
    }

    if name.contains('@') || name.contains('/') || name.contains(char::is_whitespace) {
        return Err(TossmailError::InvalidInput(format!(
            "Invalid domain name: {}",
            name
        )));
    }

    if !name.contains('.') || name.starts_with('.') || name.ends_with('.') {
        return Err(TossmailError::InvalidInput(format!(
            "Invalid domain name: {}",
            name
        )));
    }

    Ok(())
}
