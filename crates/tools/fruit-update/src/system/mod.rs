//! Root partitions, dirty flags, and mounts of the running system.

pub mod backup;
pub mod clone;
pub mod flags;
pub mod partitions;
pub mod upgrade;

/// The `mount` executable.
const MOUNT: &str = "mount";
/// The `umount` executable.
const UMOUNT: &str = "umount";
