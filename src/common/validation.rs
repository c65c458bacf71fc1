use url::Url;

/// Kinds of free-text input the engine validates before hitting the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Email,
    Url,
    Password,
    Text,
}

/// Result of validating a single input value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    /// User-facing explanation; empty when the value is valid
    pub message: String,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self {
            is_valid: true,
            message: String::new(),
        }
    }

    fn fail(message: &str) -> Self {
        Self {
            is_valid: false,
            message: message.to_string(),
        }
    }
}

/// Validate a free-text input value before it is sent anywhere.
///
/// The rules are deliberately shallow - the backend enforces the real
/// constraints; this only catches input the user can fix immediately.
pub fn validate_input(value: &str, kind: InputKind) -> ValidationOutcome {
    match kind {
        InputKind::Email => {
            if is_plausible_email(value) {
                ValidationOutcome::ok()
            } else {
                ValidationOutcome::fail("Please enter a valid email address")
            }
        }
        InputKind::Url => {
            if is_web_url(value) {
                ValidationOutcome::ok()
            } else {
                ValidationOutcome::fail("Please enter a valid http(s) URL")
            }
        }
        InputKind::Password => {
            if value.chars().count() >= 6 {
                ValidationOutcome::ok()
            } else {
                ValidationOutcome::fail("Password must be at least 6 characters")
            }
        }
        InputKind::Text => {
            if value.trim().is_empty() {
                ValidationOutcome::fail("This field is required")
            } else {
                ValidationOutcome::ok()
            }
        }
    }
}

/// Shallow email shape check: one '@', non-empty local part, and a domain
/// with an interior dot.
fn is_plausible_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match domain.find('.') {
        Some(pos) => pos > 0 && pos < domain.len() - 1,
        None => false,
    }
}

fn is_web_url(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => {
            (url.scheme() == "http" || url.scheme() == "https") && url.host_str().is_some()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(validate_input("a@b.com", InputKind::Email).is_valid);
        assert!(validate_input("user.name@sub.example.org", InputKind::Email).is_valid);
        assert!(!validate_input("abc", InputKind::Email).is_valid);
        assert!(!validate_input("@b.com", InputKind::Email).is_valid);
        assert!(!validate_input("a@bcom", InputKind::Email).is_valid);
        assert!(!validate_input("a@.com", InputKind::Email).is_valid);
        assert!(!validate_input("a@b.com ", InputKind::Email).is_valid);
    }

    #[test]
    fn password_length() {
        assert!(!validate_input("12345", InputKind::Password).is_valid);
        assert!(validate_input("123456", InputKind::Password).is_valid);
    }

    #[test]
    fn urls() {
        assert!(validate_input("https://example.com/a?b=c", InputKind::Url).is_valid);
        assert!(validate_input("http://localhost:8080", InputKind::Url).is_valid);
        assert!(!validate_input("ftp://example.com", InputKind::Url).is_valid);
        assert!(!validate_input("example.com", InputKind::Url).is_valid);
        assert!(!validate_input("", InputKind::Url).is_valid);
    }

    #[test]
    fn required_text() {
        assert!(validate_input("read", InputKind::Text).is_valid);
        assert!(!validate_input("   ", InputKind::Text).is_valid);
        let outcome = validate_input("", InputKind::Text);
        assert!(!outcome.is_valid);
        assert_eq!(outcome.message, "This field is required");
    }
}
