//! Generated plugin RPC types and service stubs, plus the small amount of
//! hand-written glue the generated code needs (the canonical bearer-token
//! header name lives here so both the server interceptor and any client
//! tooling agree on it).

tonic::include_proto!("devzat.plugin");

/// The metadata key plugin authors must send their token under. Canonical,
/// unlike the original implementation's localized header name (see
/// DESIGN.md's "Plugin auth header spelling" decision).
pub const AUTH_METADATA_KEY: &str = "authorization";

/// The prefix stripped from the `authorization` header value before
/// comparing against a known token.
pub const AUTH_BEARER_PREFIX: &str = "Bearer ";
