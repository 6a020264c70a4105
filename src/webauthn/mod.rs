pub mod models;
pub mod register;

pub use models::*;
pub use register::*;
