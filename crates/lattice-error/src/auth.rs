#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {reason}")]
    InvalidToken { reason: String },

    #[error("Token has no tenant claim")]
    MissingTenant,

    #[error("Invalid API key format")]
    InvalidApiKey,

    #[error("API key has been revoked")]
    RevokedApiKey,

    #[error("Access denied: {reason}")]
    Forbidden { reason: String },
}

impl AuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken { .. } => "invalid_token",
            Self::MissingTenant => "missing_tenant",
            Self::InvalidApiKey => "invalid_api_key",
            Self::RevokedApiKey => "revoked_api_key",
            Self::Forbidden { .. } => "forbidden",
        }
    }

    /// HTTP status equivalent: 403 for scope violations, 401 otherwise.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Forbidden { .. } => 403,
            _ => 401,
        }
    }
}
