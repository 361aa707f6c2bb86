use crate::error::DssError;

/// Startup configuration, read once from the environment and never mutated
/// afterward — the only "globals" the core needs besides the store handle.
#[derive(Clone, Debug)]
pub struct Config {
    pub min_s2_level: u8,
    pub max_s2_level: u8,
    pub token_public_key_pem: Option<String>,
    pub token_audience: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let min_s2_level = std::env::var("SCD_MIN_S2_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(13);
        let max_s2_level = std::env::var("SCD_MAX_S2_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(13);
        let token_public_key_pem = std::env::var("TOKEN_PUBLIC_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| fix_pem_whitespace(&v));
        let token_audience = std::env::var("TOKEN_AUDIENCE").ok().filter(|v| !v.is_empty());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        Self {
            min_s2_level,
            max_s2_level,
            token_public_key_pem,
            token_audience,
            port,
        }
    }

    pub fn require_public_key(&self) -> Result<&str, DssError> {
        self.token_public_key_pem
            .as_deref()
            .ok_or_else(|| DssError::ServerMisconfigured("public key for access tokens is not configured on server".into()))
    }

    pub fn require_audience(&self) -> Result<&str, DssError> {
        self.token_audience
            .as_deref()
            .ok_or_else(|| DssError::ServerMisconfigured("audience for access tokens is not configured on server".into()))
    }

    /// The fixed S2 coverer level used for every volume expansion. The
    /// coverer runs with `min_level = max_level = L`, so the two configured
    /// bounds are expected to agree; `min_s2_level` is what's actually
    /// passed to the coverer.
    pub fn s2_level(&self) -> u8 {
        self.min_s2_level
    }
}

/// Some environments collapse PEM newlines to spaces before they reach the
/// process. RFC 7468 says whitespace inside the base64 body doesn't matter,
/// but the PEM *markers* must be on their own lines for most parsers, so
/// restore them without disturbing the `-----BEGIN/END PUBLIC KEY-----`
/// literal text itself.
fn fix_pem_whitespace(raw: &str) -> String {
    raw.replace(" PUBLIC ", "_PLACEHOLDER_")
        .replace(' ', "\n")
        .replace("_PLACEHOLDER_", " PUBLIC ")
}
