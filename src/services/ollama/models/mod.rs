pub mod base;
pub mod chat;
pub mod embedding;
pub mod errors;
pub mod generate;
pub mod manage;

pub use base::*;
pub use chat::*;
pub use embedding::*;
pub use errors::*;
pub use generate::*;
pub use manage::*;
