// SPDX-License-Identifier: MPL-2.0

/// Error number, returned to user space as a small negative integer.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Errno {
    EPERM = 1,    /* Operation not permitted */
    ENOENT = 2,   /* No such file or directory */
    ESRCH = 3,    /* No such process */
    EINTR = 4,    /* Interrupted system call */
    EIO = 5,      /* I/O error */
    ENXIO = 6,    /* No such device or address */
    E2BIG = 7,    /* Argument list too long */
    ENOEXEC = 8,  /* Exec format error */
    EBADF = 9,    /* Bad file number */
    ECHILD = 10,  /* No child processes */
    EAGAIN = 11,  /* Try again */
    ENOMEM = 12,  /* Out of memory */
    EACCES = 13,  /* Permission denied */
    EFAULT = 14,  /* Bad address */
    EBUSY = 16,   /* Device or resource busy */
    EEXIST = 17,  /* File exists */
    ENODEV = 19,  /* No such device */
    ENOTDIR = 20, /* Not a directory */
    EISDIR = 21,  /* Is a directory */
    EINVAL = 22,  /* Invalid argument */
    ERANGE = 34,  /* Math result not representable */
    ENOSYS = 38,  /* Invalid system call number */
    ETIME = 62,   /* Timer expired */
}

/// The error type carried through the kernel: an errno plus an optional
/// static message for the logs.
#[derive(Debug, Clone, Copy)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_message(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn error(&self) -> Errno {
        self.errno
    }

    pub const fn message(&self) -> Option<&'static str> {
        self.msg
    }

    /// The value returned to user space.
    pub const fn as_retval(&self) -> isize {
        -(self.errno as i32 as isize)
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl From<vesper_frame::Error> for Error {
    fn from(frame_error: vesper_frame::Error) -> Self {
        match frame_error {
            vesper_frame::Error::AccessDenied => Error::new(Errno::EACCES),
            vesper_frame::Error::NoMemory => Error::new(Errno::ENOMEM),
            vesper_frame::Error::InvalidArgs => Error::new(Errno::EINVAL),
            vesper_frame::Error::IoError => Error::new(Errno::EIO),
            vesper_frame::Error::NotEnoughResources => Error::new(Errno::EBUSY),
            vesper_frame::Error::PageFault => Error::new(Errno::EFAULT),
            vesper_frame::Error::Overflow => Error::new(Errno::ERANGE),
            vesper_frame::Error::Timeout => Error::new(Errno::ETIME),
            vesper_frame::Error::Interrupted => Error::new(Errno::EINTR),
        }
    }
}

#[macro_export]
macro_rules! return_errno {
    ($errno: expr) => {
        return Err($crate::error::Error::new($errno))
    };
}

#[macro_export]
macro_rules! return_errno_with_message {
    ($errno: expr, $message: expr) => {
        return Err($crate::error::Error::with_message($errno, $message))
    };
}
