//! Parsing of `/proc/<pid>/mountinfo`.

use std::path::PathBuf;

/// Mount table of the calling process.
pub const SELF_MOUNTINFO: &str = "/proc/self/mountinfo";

/// Index of the mount point field in a mountinfo line.
const MOUNT_POINT_FIELD: usize = 4;

/// Extracts the mount point of every line, in table order.
///
/// Malformed lines are skipped.
#[must_use]
pub fn parse_mount_points(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| line.split(' ').nth(MOUNT_POINT_FIELD))
        .map(|field| PathBuf::from(unescape(field)))
        .collect()
}

/// Decodes the `\NNN` octal escapes the kernel uses for space, tab,
/// newline, and backslash.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = (bytes[i] == b'\\')
            .then(|| bytes.get(i + 1..i + 4).and_then(octal_byte))
            .flatten();
        if let Some(value) = escaped {
            out.push(value);
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn octal_byte(digits: &[u8]) -> Option<u8> {
    digits.iter().try_fold(0u8, |acc, d| match d {
        b'0'..=b'7' => acc.checked_mul(8)?.checked_add(d - b'0'),
        _ => None,
    })
}
