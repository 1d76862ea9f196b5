//! Gateway tests: provider token refresh behind live sessions and the
//! authenticated `/mcp` endpoint.

mod mcp;
mod refresh;
