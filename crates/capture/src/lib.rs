pub mod child;
pub mod fleet;
pub mod supervisor;
