//! Reference stage implementations

pub mod arithmetic;

pub use arithmetic::{AddStage, DivideStage, MultiplyStage, SubtractStage};
