//! Shared value objects used across multiple bounded contexts

use super::error::PhoneError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Session identifier, assigned by the engine when it constructs a session object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UriScheme {
    Sip,
    Sips,
}

impl UriScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UriScheme::Sip => "sip",
            UriScheme::Sips => "sips",
        }
    }
}

/// Validated SIP address with non-empty user and domain parts.
///
/// `bob@example.com` is read as `sip:bob@example.com`. Only the `sip` and
/// `sips` schemes are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipAddress {
    scheme: UriScheme,
    user: String,
    host: String,
    uri: String,
}

impl SipAddress {
    pub fn parse(input: &str) -> Result<Self, PhoneError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PhoneError::InvalidAddress("empty address".to_string()));
        }

        let (scheme, rest) = split_scheme(input)?;
        let (user, host_part) = rest.split_once('@').ok_or_else(|| {
            PhoneError::InvalidAddress(format!("{input}: expected user@domain"))
        })?;
        if user.is_empty() || host_part.is_empty() {
            return Err(PhoneError::InvalidAddress(format!(
                "{input}: expected user@domain"
            )));
        }

        let canonical = format!("{}:{}", scheme.as_str(), rest);
        let parsed = rsip::Uri::try_from(canonical.as_str())
            .map_err(|e| PhoneError::InvalidAddress(format!("{input}: {e}")))?;

        let user = parsed
            .auth
            .map(|auth| auth.user)
            .filter(|user| !user.is_empty())
            .ok_or_else(|| PhoneError::InvalidAddress(format!("{input}: missing user part")))?;
        let host = parsed.host_with_port.host.to_string();
        if host.is_empty() {
            return Err(PhoneError::InvalidAddress(format!(
                "{input}: missing domain part"
            )));
        }

        Ok(Self {
            scheme,
            user,
            host,
            uri: canonical,
        })
    }

    /// Resolve a dial/transfer/message target against the home domain.
    ///
    /// A bare user name (no `@`, no scheme) becomes `sip:<user>@<home_domain>`.
    pub fn resolve(target: &str, home_domain: &str) -> Result<Self, PhoneError> {
        let target = target.trim();
        let qualified;
        let candidate = if !target.is_empty() && !target.contains('@') && !target.contains(':') {
            qualified = format!("sip:{target}@{home_domain}");
            qualified.as_str()
        } else {
            target
        };

        Self::parse(candidate).map_err(|e| match e {
            PhoneError::InvalidAddress(reason) => PhoneError::InvalidTarget(reason),
            other => other,
        })
    }

    pub fn scheme(&self) -> UriScheme {
        self.scheme
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Host part, used as the home domain for target resolution
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn as_str(&self) -> &str {
        &self.uri
    }
}

fn split_scheme(input: &str) -> Result<(UriScheme, &str), PhoneError> {
    // only a delimiter in front of the user part counts as a scheme
    let head = input.split_once('@').map_or(input, |(head, _)| head);
    match head.split_once(':') {
        Some((scheme, _)) => {
            let rest = &input[scheme.len() + 1..];
            match scheme.to_ascii_lowercase().as_str() {
                "sip" => Ok((UriScheme::Sip, rest)),
                "sips" => Ok((UriScheme::Sips, rest)),
                other => Err(PhoneError::InvalidAddress(format!(
                    "{input}: unsupported scheme '{other}'"
                ))),
            }
        }
        None => Ok((UriScheme::Sip, input)),
    }
}

impl fmt::Display for SipAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl Serialize for SipAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.uri)
    }
}

impl<'de> Deserialize<'de> for SipAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SipAddress::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Username used for digest authorization.
///
/// Never fails: `sip:alice@host` and `alice@host` give `alice`, input
/// without `@` is returned unchanged.
pub fn derive_authorization_username(address: &str) -> String {
    if let Some(after_scheme) = address.split(':').nth(1) {
        if let Some((user, _)) = after_scheme.split_once('@') {
            return user.to_string();
        }
    }

    if let Some((user, _)) = address.split_once('@') {
        return user.to_string();
    }

    address.to_string()
}
