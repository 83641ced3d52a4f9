//! Last-resort durability for undeliverable flushes.

mod dump;

pub use dump::{DumpError, FileDumper};
