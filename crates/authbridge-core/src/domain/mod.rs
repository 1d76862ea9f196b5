//! Domain entities

mod authorization;
mod client;
mod provider;
mod session;
mod token;

pub use authorization::*;
pub use client::*;
pub use provider::*;
pub use session::*;
pub use token::*;
