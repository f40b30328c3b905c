//! Mutable in-memory representation of JVM class files
//!
//!   - [`jvm::class_file`] reads and writes the binary class format, as a stream of
//!     [`jvm::class_file::ClassVisitor`] events
//!   - [`jvm::model`] is the editable view: classes, their members, and method bodies as linked
//!     lists of [`jvm::code::Instruction`]s with labels instead of offsets
//!   - [`pool`] groups classes by name, moves them in and out of JARs and directories, and
//!     hands them to [`pool::Loader`]s
//!
//! Decoding then re-encoding an unmodified class keeps everything the model knows about. Stack
//! map frames are not computed, and the stored max stack and max locals are written back as-is.

pub mod jvm;
pub mod pool;
pub mod util;
