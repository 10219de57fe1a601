//! Crank Shared Library
//! 
//! Wire framing and error types shared by the router and connector sides
//! of a crank socket.

pub mod protocol;
pub mod error;

pub use error::{Error, Result};
pub use protocol::CloseStatus;
