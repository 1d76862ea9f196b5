//! Security properties: PKCE binding, callback state, envelope sealing and
//! the bearer challenge.

mod csrf;
mod envelope;
mod pkce;
