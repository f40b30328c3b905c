mod access_flags;
pub mod class_file;
pub mod code;
mod constant_value;
mod errors;
pub mod model;
mod opcodes;

pub use access_flags::*;
pub use constant_value::*;
pub use errors::*;
pub use opcodes::*;
