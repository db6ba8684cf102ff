/*!
Form validation for the login and signup forms.

These checks run before the handler touches either database; a form that
fails here never costs a network round trip. The messages are the ones
the front end shows next to each field.
*/
use once_cell::sync::Lazy;
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_DISPLAY_NAME_LEN: usize = 2;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    // Deliberately loose: one @, no whitespace, something dotted after.
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap()
});

#[derive(Clone, Debug, PartialEq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: &str) -> Self {
        Self { field, message: message.to_owned() }
    }
}

/// Join field errors into a single banner line.
pub fn error_banner(errors: &[FieldError]) -> String {
    let msgs: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
    msgs.join(" ")
}

pub fn valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// At least one lowercase letter, one uppercase letter, and one digit.
fn password_has_mix(password: &str) -> bool {
    password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    if email.trim().is_empty() {
        errors.push(FieldError::new("email", "Email is required."));
    } else if !valid_email(email) {
        errors.push(FieldError::new(
            "email", "Please enter a valid email address."
        ));
    }
}

pub fn validate_login(email: &str, password: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();

    check_email(email, &mut errors);

    if password.is_empty() {
        errors.push(FieldError::new("password", "Password is required."));
    } else if password.len() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new(
            "password", "Password must be at least 6 characters."
        ));
    }

    errors
}

pub fn validate_signup(
    email: &str,
    password: &str,
    confirm_password: &str,
    display_name: &str,
) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if display_name.trim().is_empty() {
        errors.push(FieldError::new(
            "displayName", "Full name is required."
        ));
    } else if display_name.trim().len() < MIN_DISPLAY_NAME_LEN {
        errors.push(FieldError::new(
            "displayName", "Full name must be at least 2 characters."
        ));
    }

    check_email(email, &mut errors);

    if password.is_empty() {
        errors.push(FieldError::new("password", "Password is required."));
    } else if password.len() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new(
            "password", "Password must be at least 6 characters."
        ));
    } else if !password_has_mix(password) {
        errors.push(FieldError::new(
            "password",
            "Password must contain at least one uppercase letter, one lowercase letter, and one number."
        ));
    }

    if confirm_password.is_empty() {
        errors.push(FieldError::new(
            "confirmPassword", "Please confirm your password."
        ));
    } else if password != confirm_password {
        errors.push(FieldError::new(
            "confirmPassword", "Passwords do not match."
        ));
    }

    errors
}

/// The password half of the signup rules, for the reset-password form.
pub fn validate_password_change(
    password: &str,
    confirm_password: &str,
) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if password.is_empty() {
        errors.push(FieldError::new("password", "Password is required."));
    } else if password.len() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new(
            "password", "Password must be at least 6 characters."
        ));
    } else if !password_has_mix(password) {
        errors.push(FieldError::new(
            "password",
            "Password must contain at least one uppercase letter, one lowercase letter, and one number."
        ));
    }

    if confirm_password.is_empty() {
        errors.push(FieldError::new(
            "confirmPassword", "Please confirm your password."
        ));
    } else if password != confirm_password {
        errors.push(FieldError::new(
            "confirmPassword", "Passwords do not match."
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(valid_email("thelma@camelotacademy.org"));
        assert!(valid_email("a@b.co"));
        assert!(!valid_email(""));
        assert!(!valid_email("no-at-sign.org"));
        assert!(!valid_email("two@at@signs.org"));
        assert!(!valid_email("spaces in@address.org"));
        assert!(!valid_email("nodot@tld"));
    }

    #[test]
    fn login_validation() {
        assert!(validate_login("dan@camelotacademy.org", "Secret1").is_empty());

        let errs = validate_login("", "");
        assert_eq!(errs.len(), 2);
        assert_eq!(errs[0].field, "email");
        assert_eq!(errs[1].field, "password");

        let errs = validate_login("dan@camelotacademy.org", "short");
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].message, "Password must be at least 6 characters.");
    }

    #[test]
    fn signup_validation() {
        assert!(validate_signup(
            "jenny@camelotacademy.org", "Secret1", "Secret1", "Ms Jenny"
        ).is_empty());

        // Long enough but no digit.
        let errs = validate_signup(
            "jenny@camelotacademy.org", "Secretive", "Secretive", "Ms Jenny"
        );
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("one number"));

        let errs = validate_signup(
            "jenny@camelotacademy.org", "Secret1", "Secret2", "Ms Jenny"
        );
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].message, "Passwords do not match.");

        let errs = validate_signup("jenny@camelotacademy.org", "Secret1", "Secret1", "J");
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].field, "displayName");
    }

    #[test]
    fn password_change_validation() {
        assert!(validate_password_change("NewSecret1", "NewSecret1").is_empty());

        let errs = validate_password_change("alllowercase1", "alllowercase1");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("uppercase"));

        let errs = validate_password_change("NewSecret1", "");
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].message, "Please confirm your password.");
    }

    #[test]
    fn banner_joins_messages() {
        let errs = validate_login("", "");
        let banner = error_banner(&errs);
        assert!(banner.contains("Email is required."));
        assert!(banner.contains("Password is required."));
    }
}
