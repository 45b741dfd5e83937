//! OAuth constants for the single-client authorization server
//!
//! Lifetimes and literal protocol values shared by the code flow, the
//! token verifier and the discovery metadata served by the HTTP layer.

/// Authorization code lifetime: 10 minutes
pub const CODE_TTL_SECS: i64 = 600;

/// Access token lifetime: 24 hours
pub const TOKEN_TTL_SECS: i64 = 86_400;

/// Random bytes behind each authorization code (43 base64url chars)
pub const CODE_BYTES: usize = 32;

/// Random bytes behind each access token (64 base64url chars)
pub const TOKEN_BYTES: usize = 48;

/// Scope granted when the authorization request omits one
pub const DEFAULT_SCOPE: &str = "mcp";

/// Scopes advertised by the discovery documents
pub const SUPPORTED_SCOPES: &[&str] = &["mcp", "claudeai"];

/// The only token type this server issues
pub const TOKEN_TYPE: &str = "Bearer";

/// The only `response_type` accepted by the authorization endpoint
pub const RESPONSE_TYPE_CODE: &str = "code";

/// The only `grant_type` accepted by the token endpoint
pub const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";

/// PKCE methods advertised in discovery, strongest first
pub const CODE_CHALLENGE_METHODS: &[&str] = &["S256", "plain"];
