//! Wire format between the parent and the container's init.
//!
//! Two pipes, both `O_CLOEXEC`:
//!
//! - release: the parent writes [`RELEASE_BYTE`] once the child sits in its
//!   cgroups. EOF without it means the parent gave up.
//! - status: the child writes fixed-size [`ChildReport`] records. A
//!   successful `exec` closes the write end, so EOF after [`ChildReport::Rooted`]
//!   means the user command is running.

use std::io::{self, Read, Write};

use pocker_common::types::SetupStep;

/// Byte the parent sends to let the child continue.
pub const RELEASE_BYTE: u8 = b'G';

/// Size of one status record: a step code and a little-endian `i32` errno.
pub const RECORD_LEN: usize = 5;

/// Progress reported by the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildReport {
    /// The child is inside its new root.
    Rooted,
    /// A setup step failed with `errno`.
    Failed {
        /// Step that failed.
        step: SetupStep,
        /// OS error number.
        errno: i32,
    },
}

impl ChildReport {
    /// Encodes the record. `Rooted` is all zeros; step codes are never zero.
    #[must_use]
    pub fn encode(self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        if let Self::Failed { step, errno } = self {
            record[0] = step.code();
            record[1..].copy_from_slice(&errno.to_le_bytes());
        }
        record
    }

    /// Decodes a record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` for an unknown step code.
    pub fn decode(record: [u8; RECORD_LEN]) -> io::Result<Self> {
        let errno = i32::from_le_bytes([record[1], record[2], record[3], record[4]]);
        match record[0] {
            0 => Ok(Self::Rooted),
            code => SetupStep::from_code(code)
                .map(|step| Self::Failed { step, errno })
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unknown setup step code {code}"),
                    )
                }),
        }
    }
}

/// Writes one record.
///
/// # Errors
///
/// Returns the error of the underlying write.
pub fn write_record(writer: &mut impl Write, report: ChildReport) -> io::Result<()> {
    writer.write_all(&report.encode())
}

/// Reads one record, or `None` on a clean end of stream.
///
/// # Errors
///
/// Returns `UnexpectedEof` if the stream ends inside a record, and
/// `InvalidData` for an undecodable one.
pub fn read_record(reader: &mut impl Read) -> io::Result<Option<ChildReport>> {
    let mut record = [0u8; RECORD_LEN];
    let mut filled = 0;
    while filled < RECORD_LEN {
        match reader.read(&mut record[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "status record truncated",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    ChildReport::decode(record).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_is_all_zeros() {
        assert_eq!(ChildReport::Rooted.encode(), [0; RECORD_LEN]);
    }

    #[test]
    fn failure_layout() {
        let report = ChildReport::Failed {
            step: SetupStep::PivotRoot,
            errno: libc::EINVAL,
        };
        let record = report.encode();
        assert_eq!(record[0], SetupStep::PivotRoot.code());
        assert_eq!(&record[1..], &libc::EINVAL.to_le_bytes());
        assert_eq!(ChildReport::decode(record).expect("decode"), report);
    }

    #[test]
    fn reads_stream_until_eof() {
        let mut stream = Vec::new();
        write_record(&mut stream, ChildReport::Rooted).expect("write");
        write_record(
            &mut stream,
            ChildReport::Failed {
                step: SetupStep::Exec,
                errno: libc::ENOENT,
            },
        )
        .expect("write");

        let mut reader = stream.as_slice();
        assert_eq!(read_record(&mut reader).expect("first"), Some(ChildReport::Rooted));
        assert!(matches!(
            read_record(&mut reader).expect("second"),
            Some(ChildReport::Failed {
                step: SetupStep::Exec,
                errno: libc::ENOENT
            })
        ));
        assert_eq!(read_record(&mut reader).expect("eof"), None);
    }

    #[test]
    fn truncated_record_is_an_error() {
        let mut reader: &[u8] = &[4, 0, 0];
        let err = read_record(&mut reader).expect_err("truncated");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn unknown_step_is_invalid() {
        let err = ChildReport::decode([200, 0, 0, 0, 0]).expect_err("unknown");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
