//! ext2-compatible filesystem engine over a sector device, with an
//! interactive shell on top.
pub mod disk;
pub mod fs;
pub mod shell;
pub mod utils;
