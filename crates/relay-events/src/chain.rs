use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed chain identifier `{0}`")]
pub struct InvalidChainId(pub String);

/// A blockchain rail identifier of the form `{ns}:{net}[:{chainId}]`,
/// e.g. `evm:base:8453`. Every segment must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(String);

impl ChainId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        self.0.split(':').next().expect("validated on construction")
    }

    pub fn network(&self) -> &str {
        self.0.split(':').nth(1).expect("validated on construction")
    }

    /// The optional third segment, e.g. the EVM chain id.
    pub fn reference(&self) -> Option<&str> {
        self.0.split(':').nth(2)
    }
}

impl FromStr for ChainId {
    type Err = InvalidChainId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split(':').collect();
        if !(2..=3).contains(&segments.len()) || segments.iter().any(|seg| seg.is_empty()) {
            return Err(InvalidChainId(s.to_string()));
        }

        Ok(ChainId(s.to_string()))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(de::Error::custom)
    }
}
