mod pin;
mod segment;
mod skeleton;
mod solver;

pub use pin::*;
pub use segment::*;
pub use skeleton::*;


#[cfg(test)]
mod pin_tests;
