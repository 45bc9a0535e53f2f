//! User Agent identity: who we are and which WebSocket server carries our signaling

use crate::domain::shared::{derive_authorization_username, PhoneError, Result, SipAddress};
use std::fmt;
use url::Url;

/// WebSocket transport flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Ws,
    Wss,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Ws => "WS",
            TransportProtocol::Wss => "WSS",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            TransportProtocol::Ws => 80,
            TransportProtocol::Wss => 443,
        }
    }
}

/// Parsed `ws://` / `wss://` server URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEndpoint {
    url: Url,
    protocol: TransportProtocol,
}

impl TransportEndpoint {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim()).map_err(|e| {
            PhoneError::TransportUnavailable(format!("invalid transport URL '{raw}': {e}"))
        })?;

        let protocol = match url.scheme() {
            "ws" => TransportProtocol::Ws,
            "wss" => TransportProtocol::Wss,
            other => {
                return Err(PhoneError::TransportUnavailable(format!(
                    "unsupported transport scheme '{other}', expected ws or wss"
                )))
            }
        };

        if url.host_str().is_none() {
            return Err(PhoneError::TransportUnavailable(format!(
                "transport URL '{raw}' has no host"
            )));
        }

        Ok(Self { url, protocol })
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url
            .port()
            .unwrap_or_else(|| self.protocol.default_port())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for TransportEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Authorization secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(****)")
    }
}

/// Immutable identity of the User Agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    address: SipAddress,
    authorization_username: String,
    credential: Credential,
    transport: TransportEndpoint,
}

impl Identity {
    pub fn new(address: &str, credential: &str, transport_url: &str) -> Result<Self> {
        let parsed = SipAddress::parse(address)?;
        let transport = TransportEndpoint::parse(transport_url)?;

        Ok(Self {
            address: parsed,
            // derived from the raw input, as the server expects it
            authorization_username: derive_authorization_username(address.trim()),
            credential: Credential::new(credential),
            transport,
        })
    }

    pub fn address(&self) -> &SipAddress {
        &self.address
    }

    pub fn authorization_username(&self) -> &str {
        &self.authorization_username
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn transport(&self) -> &TransportEndpoint {
        &self.transport
    }

    pub fn domain(&self) -> &str {
        self.address.host()
    }
}
