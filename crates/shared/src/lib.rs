pub mod domain;
pub mod error;
pub mod message;
pub mod number;
pub mod protocol;
