// Common utilities shared by handlers

pub mod flags;

pub use flags::TriState;
