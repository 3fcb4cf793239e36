//! UTS namespace: the container's own hostname.

use pocker_common::error::{PockerError, Result};

/// Longest hostname the kernel accepts (`HOST_NAME_MAX`).
pub const MAX_HOSTNAME_LEN: usize = 64;

/// Checks that `name` is a usable hostname.
///
/// # Errors
///
/// Returns a `Config` error if the name is empty, too long, starts with a
/// hyphen, or contains characters other than ASCII letters, digits, `-`
/// and `.`.
pub fn validate_hostname(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_HOSTNAME_LEN
        && !name.starts_with('-')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.');
    if valid {
        Ok(())
    } else {
        Err(PockerError::Config {
            message: format!("invalid hostname: {name:?}"),
        })
    }
}

/// Sets the hostname of the calling process's UTS namespace.
///
/// # Errors
///
/// Returns the errno from `sethostname(2)`.
#[cfg(target_os = "linux")]
pub fn set_hostname(name: &str) -> nix::Result<()> {
    nix::unistd::sethostname(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_container_ids_and_dns_names() {
        validate_hostname("0123456789abcdef0123456789abcdef").expect("id");
        validate_hostname("web-1.local").expect("dns");
    }

    #[test]
    fn rejects_bad_names() {
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("-leading").is_err());
        assert!(validate_hostname("has space").is_err());
        assert!(validate_hostname(&"a".repeat(MAX_HOSTNAME_LEN + 1)).is_err());
    }
}
