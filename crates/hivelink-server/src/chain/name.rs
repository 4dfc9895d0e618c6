//! Account name rules.
//!
//! 3 to 16 characters; dot-separated segments of at least 3 characters, each
//! starting with a lowercase letter, containing only lowercase letters,
//! digits and hyphens, and ending with a letter or digit.

pub const MIN_LEN: usize = 3;
pub const MAX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountNameError {
    #[error("account name must be {MIN_LEN} to {MAX_LEN} characters")]
    Length,

    #[error("each segment must be at least {MIN_LEN} characters")]
    SegmentTooShort,

    #[error("each segment must start with a lowercase letter")]
    BadStart,

    #[error("account name may only contain lowercase letters, digits, hyphens and dots")]
    BadCharacter,

    #[error("each segment must end with a letter or digit")]
    BadEnd,

    #[error("account name may not contain consecutive hyphens")]
    DoubleHyphen,
}

pub fn validate_account_name(name: &str) -> Result<(), AccountNameError> {
    if !(MIN_LEN..=MAX_LEN).contains(&name.len()) {
        return Err(AccountNameError::Length);
    }

    for segment in name.split('.') {
        let bytes = segment.as_bytes();
        if bytes.len() < MIN_LEN {
            return Err(AccountNameError::SegmentTooShort);
        }
        if !bytes[0].is_ascii_lowercase() {
            return Err(AccountNameError::BadStart);
        }
        if !bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        {
            return Err(AccountNameError::BadCharacter);
        }
        if segment.contains("--") {
            return Err(AccountNameError::DoubleHyphen);
        }
        if !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
            return Err(AccountNameError::BadEnd);
        }
    }

    Ok(())
}
