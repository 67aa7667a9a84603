//! Outbound proxy for upstream requests, for mirrors that are only
//! reachable through another proxy.

use std::fmt;
use std::str::FromStr;

use reqwest::Proxy;

use crate::ProxyError;

/// Which upstream requests go through the outbound proxy
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum ProxyType {
    /// Only `http://` origins
    Http,
    /// Only `https://` origins
    Https,
    /// Every origin, through a SOCKS5 server
    Socks5,
    /// Every origin
    All,
}

impl ProxyType {
    /// Scheme assumed when the proxy URL has none
    fn default_scheme(self) -> &'static str {
        match self {
            ProxyType::Socks5 => "socks5",
            ProxyType::Http | ProxyType::Https | ProxyType::All => "http",
        }
    }
}

impl FromStr for ProxyType {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks5" => Ok(ProxyType::Socks5),
            "all" => Ok(ProxyType::All),
            other => Err(ProxyError::Proxy(format!("unknown proxy type '{other}'"))),
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks5 => "socks5",
            ProxyType::All => "all",
        })
    }
}

/// Basic credentials for the outbound proxy
#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Outbound proxy settings
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy address, with or without a scheme (`proxy.local:3128`)
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    /// Proxy URL with the scheme filled in from the proxy type
    pub fn endpoint(&self) -> String {
        if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("{}://{}", self.proxy_type.default_scheme(), self.url)
        }
    }

    pub fn to_reqwest(&self) -> Result<Proxy, ProxyError> {
        let endpoint = self.endpoint();
        let proxy = match self.proxy_type {
            ProxyType::Http => Proxy::http(&endpoint),
            ProxyType::Https => Proxy::https(&endpoint),
            ProxyType::Socks5 | ProxyType::All => Proxy::all(&endpoint),
        }
        .map_err(|e| ProxyError::Proxy(format!("invalid {} proxy {endpoint}: {e}", self.proxy_type)))?;

        Ok(match &self.auth {
            Some(auth) => proxy.basic_auth(&auth.username, &auth.password),
            None => proxy,
        })
    }
}
