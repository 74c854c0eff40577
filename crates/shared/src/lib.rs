pub mod account;
pub mod domain;
pub mod error;
pub mod okr;
pub mod progress;
pub mod protocol;
