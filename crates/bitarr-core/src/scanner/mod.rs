mod walk;

pub use walk::{mtime_nanos, FileDescriptor, FileWalker, WalkEntry};
