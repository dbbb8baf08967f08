pub mod core;
pub mod error;
pub mod runs;

#[cfg(test)]
mod tests;

pub use self::core::*;
pub use self::error::*;
pub use self::runs::*;
