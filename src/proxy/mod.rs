// Proxy module - routing reverse proxy between Claude Code and its providers
//
// Each /v1/messages request is classified (main session vs subagent), sanitized
// for the chosen provider, forwarded with streaming passthrough, and for z.ai
// subagents fed through the per-conversation tool usage tracker.

pub mod error;
mod handlers;
mod helpers;
pub mod routing;
pub mod server;
pub mod sse;
pub mod state;
pub mod tracker;
pub mod transformation;
pub mod upstream;

#[cfg(test)]
mod test_support;

pub use server::start_proxy;
