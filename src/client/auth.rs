use clap::ValueEnum;
use std::str::FromStr;

/// Bearer credential for the warehouse SQL API
#[derive(Clone)]
pub enum Auth {
    /// Key-pair authentication with a signed JWT
    KeypairJwt(String),
    /// OAuth access token
    OAuth(String),
    /// Programmatic access token
    Pat(String),
}

impl Auth {
    pub fn new(r#type: &AuthType, token: String) -> Self {
        match r#type {
            AuthType::KeypairJwt => Self::KeypairJwt(token),
            AuthType::Oauth => Self::OAuth(token),
            AuthType::Pat => Self::Pat(token),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Self::KeypairJwt(token) | Self::OAuth(token) | Self::Pat(token) => token,
        }
    }

    /// Value of the `X-Snowflake-Authorization-Token-Type` header
    pub fn token_type(&self) -> &'static str {
        match self {
            Self::KeypairJwt(_) => "KEYPAIR_JWT",
            Self::OAuth(_) => "OAUTH",
            Self::Pat(_) => "PROGRAMMATIC_ACCESS_TOKEN",
        }
    }

    /// `AUTHENTICATOR` named in a session login request
    pub fn authenticator(&self) -> &'static str {
        match self {
            Self::KeypairJwt(_) => "SNOWFLAKE_JWT",
            Self::OAuth(_) => "OAUTH",
            Self::Pat(_) => "PROGRAMMATIC_ACCESS_TOKEN",
        }
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(<redacted>)", self)
    }
}

impl std::fmt::Display for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeypairJwt(_) => write!(f, "KeypairJwt"),
            Self::OAuth(_) => write!(f, "OAuth"),
            Self::Pat(_) => write!(f, "Pat"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum AuthType {
    KeypairJwt,
    Oauth,
    Pat,
}

impl FromStr for AuthType {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keypair_jwt" | "keypair-jwt" | "jwt" => Ok(Self::KeypairJwt),
            "oauth" => Ok(Self::Oauth),
            "pat" | "programmatic_access_token" => Ok(Self::Pat),
            _ => Err(()),
        }
    }
}
