use std::collections::TryReserveError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OvlError>;

#[derive(Error, Debug)]
pub enum OvlError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corrupt state file: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<TryReserveError> for OvlError {
    fn from(err: TryReserveError) -> Self {
        OvlError::OutOfMemory(err.to_string())
    }
}

impl OvlError {
    /// Not-found is an ordinary outcome for lookups, not a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OvlError::NotFound(_))
    }

    /// Map the error onto the errno the VFS layer hands back to the kernel.
    pub fn errno(&self) -> i32 {
        match self {
            OvlError::NotFound(_) => libc::ENOENT,
            OvlError::AlreadyExists(_) => libc::EEXIST,
            OvlError::OutOfMemory(_) => libc::ENOMEM,
            OvlError::InvalidArgument(_) | OvlError::Config(_) => libc::EINVAL,
            OvlError::Corrupt(_) => libc::EIO,
            OvlError::Io(e) => io_error_to_libc(e),
        }
    }
}

/// Map std::io::Error to a libc error code, preferring the raw OS error.
pub(crate) fn io_error_to_libc(e: &std::io::Error) -> i32 {
    if let Some(code) = e.raw_os_error() {
        return code;
    }

    match e.kind() {
        std::io::ErrorKind::NotFound => libc::ENOENT,
        std::io::ErrorKind::PermissionDenied => libc::EACCES,
        std::io::ErrorKind::AlreadyExists => libc::EEXIST,
        std::io::ErrorKind::InvalidInput => libc::EINVAL,
        std::io::ErrorKind::InvalidData => libc::EINVAL,
        std::io::ErrorKind::Interrupted => libc::EINTR,
        std::io::ErrorKind::WriteZero => libc::ENOSPC,
        std::io::ErrorKind::OutOfMemory => libc::ENOMEM,
        std::io::ErrorKind::WouldBlock => libc::EAGAIN,
        std::io::ErrorKind::Unsupported => libc::ENOTSUP,
        _ => libc::EIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(OvlError::NotFound("x".into()).errno(), libc::ENOENT);
        assert_eq!(OvlError::AlreadyExists("x".into()).errno(), libc::EEXIST);
        assert_eq!(OvlError::OutOfMemory("x".into()).errno(), libc::ENOMEM);
        assert_eq!(OvlError::InvalidArgument("x".into()).errno(), libc::EINVAL);
        assert_eq!(OvlError::Corrupt("x".into()).errno(), libc::EIO);
    }

    #[test]
    fn test_io_error_prefers_raw_os_error() {
        let err = OvlError::from(std::io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(err.errno(), libc::ENOSPC);

        let err = OvlError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert_eq!(err.errno(), libc::EACCES);
    }

    #[test]
    fn test_is_not_found() {
        assert!(OvlError::NotFound("inode 9".into()).is_not_found());
        assert!(!OvlError::Corrupt("bad".into()).is_not_found());
    }
}
