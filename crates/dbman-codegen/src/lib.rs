pub mod typescript;

pub use typescript::{EnumGenerator, Error};
