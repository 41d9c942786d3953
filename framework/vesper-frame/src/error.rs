// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// Invalid arguments provided.
    InvalidArgs,
    /// Insufficient physical memory.
    NoMemory,
    /// The page fault could not be resolved.
    PageFault,
    /// The permission of the operation is violated.
    AccessDenied,
    /// Input/output error.
    IoError,
    /// Insufficient system resources.
    NotEnoughResources,
    /// Arithmetic overflow while computing an address or a length.
    Overflow,
    /// The operation timed out.
    Timeout,
    /// The operation was interrupted.
    Interrupted,
}
