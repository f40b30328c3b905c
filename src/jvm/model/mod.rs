//! Mutable, semantic view of classes
//!
//! Unlike [`super::class_file`], nothing here refers to constant pool indices or bytecode offsets:
//! members carry their names and descriptors directly, and jumps point at labels.

mod class;
mod field;
mod method;

pub use class::*;
pub use field::*;
pub use method::*;

/// Class member, identified by its name and descriptor
pub trait Member {
    fn name(&self) -> &str;
    fn descriptor(&self) -> &str;
}
