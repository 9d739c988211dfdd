pub mod board;
pub mod client;
pub mod error;

pub use board::*;
pub use client::BoardClient;
pub use error::{FailureKind, RemoteError};
