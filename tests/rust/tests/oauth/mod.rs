//! OAuth authorization server tests: discovery, registration, the
//! authorize → callback → access-token flow, refresh and revocation.

mod discovery;
mod flow;
mod token;
