//! Bridge sessions
//!
//! Sealing bearers, refreshing provider tokens behind them, and handing live
//! tokens to tool code.

mod accessor;
mod grant;
mod memory_store;
mod refresh;
mod token_service;

pub use accessor::{extract_auth_context, AuthContext, AuthContextAccessor, AuthInfo};
pub use grant::{IssuedCode, PendingGrant};
pub use memory_store::{MemoryOAuthClientProvider, TtlMap};
pub use refresh::{FreshToken, TokenRefreshOrchestrator};
pub use token_service::{SessionTokenService, SessionTokens};
