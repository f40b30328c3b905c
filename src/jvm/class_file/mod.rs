//! Binary class file codec
//!
//! [`ClassReader`] turns class file bytes into [`ClassVisitor`] events and [`ClassWriter`] turns
//! those same events back into bytes. The in-memory model (see [`crate::jvm::model`]) sits in
//! between: it is built by receiving events and encoded by replaying them.

mod attribute;
mod class;
mod constants;
mod reader;
mod serialize;
mod version;
mod visitor;
mod writer;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use reader::*;
pub use serialize::*;
pub use version::*;
pub use visitor::*;
pub use writer::*;
