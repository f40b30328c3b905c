mod code;
mod instructions;
mod label;
mod try_catch;

pub use code::*;
pub use instructions::*;
pub use label::*;
pub use try_catch::*;
