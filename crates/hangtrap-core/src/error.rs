//! Error types for the hang-trap protocol

use thiserror::Error;

/// Result type for trap operations
pub type TrapResult<T> = Result<T, TrapError>;

/// Errors surfaced by control-channel operations and core hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrapError {
    /// Malformed argument block, null buffer, or unknown request
    #[error("invalid argument")]
    InvalidArgument,

    /// No trap context for the given device or BDF
    #[error("no trap context for device")]
    NotFound,

    /// Another live process owns the context
    #[error("trap context owned by another process")]
    Busy,

    /// Caller is not the live owner of the context
    #[error("caller does not own the trap context")]
    PermissionDenied,

    /// Operation not valid for the current trap status
    #[error("operation invalid in current trap state")]
    InvalidState,

    /// Bounded wait expired
    #[error("timed out waiting for dump completion")]
    Timeout,

    /// Wait aborted by an interrupt on the calling channel
    #[error("wait interrupted")]
    Interrupted,

    /// Copying diagnosis bytes in or out failed
    #[error("diagnosis data I/O failed")]
    Io,
}

#[cfg(target_os = "linux")]
const INVALID_STATE_ERRNO: i32 = libc::EBADFD;
#[cfg(not(target_os = "linux"))]
const INVALID_STATE_ERRNO: i32 = libc::EPROTO;

impl TrapError {
    /// POSIX errno for this error (positive)
    pub const fn errno(self) -> i32 {
        match self {
            TrapError::InvalidArgument => libc::EINVAL,
            TrapError::NotFound => libc::ENODEV,
            TrapError::Busy => libc::EBUSY,
            TrapError::PermissionDenied => libc::EACCES,
            TrapError::InvalidState => INVALID_STATE_ERRNO,
            TrapError::Timeout => libc::ETIMEDOUT,
            TrapError::Interrupted => libc::EINTR,
            TrapError::Io => libc::EIO,
        }
    }

    /// Signed return code as seen by the control channel (always negative)
    #[inline]
    pub const fn as_return_code(self) -> i32 {
        -self.errno()
    }

    /// Map an errno (either sign) back to an error kind
    pub fn from_errno(errno: i32) -> Option<TrapError> {
        let errno = errno.checked_abs()?;
        let err = match errno {
            libc::EINVAL => TrapError::InvalidArgument,
            libc::ENODEV => TrapError::NotFound,
            libc::EBUSY => TrapError::Busy,
            libc::EACCES => TrapError::PermissionDenied,
            e if e == INVALID_STATE_ERRNO => TrapError::InvalidState,
            libc::ETIMEDOUT => TrapError::Timeout,
            libc::EINTR => TrapError::Interrupted,
            libc::EIO => TrapError::Io,
            _ => return None,
        };
        Some(err)
    }
}

/// Convert a channel return code into a result
///
/// `0` is success; negative values decode to an error kind, unknown
/// codes fold into `Io`.
pub fn check_return_code(rc: i64) -> TrapResult<()> {
    if rc >= 0 {
        return Ok(());
    }
    let errno = i32::try_from(rc).unwrap_or(i32::MIN);
    Err(TrapError::from_errno(errno).unwrap_or(TrapError::Io))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", TrapError::Busy), "trap context owned by another process");
        assert_eq!(format!("{}", TrapError::Timeout), "timed out waiting for dump completion");
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(TrapError::InvalidArgument.errno(), libc::EINVAL);
        assert_eq!(TrapError::Busy.as_return_code(), -libc::EBUSY);
        assert_eq!(TrapError::Timeout.as_return_code(), -libc::ETIMEDOUT);
    }

    #[test]
    fn test_errno_round_trip_all_kinds() {
        let all = [
            TrapError::InvalidArgument,
            TrapError::NotFound,
            TrapError::Busy,
            TrapError::PermissionDenied,
            TrapError::InvalidState,
            TrapError::Timeout,
            TrapError::Interrupted,
            TrapError::Io,
        ];
        for err in all {
            assert_eq!(TrapError::from_errno(err.as_return_code()), Some(err));
        }
        assert_eq!(TrapError::from_errno(0), None);
    }

    #[test]
    fn test_check_return_code() {
        assert!(check_return_code(0).is_ok());
        assert_eq!(
            check_return_code(-(libc::EACCES as i64)),
            Err(TrapError::PermissionDenied)
        );
        assert_eq!(check_return_code(-100_000), Err(TrapError::Io));
    }
}
