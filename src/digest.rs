use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid digest {0:?}: expected <algorithm>:<hex>")]
pub struct DigestError(pub String);

/// Content address of a manifest, `<algorithm>:<hex>`.
#[derive(Clone, Debug, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    pub algo: String,
    pub hash: String,
}

impl Digest {
    pub fn sha256(hash: &str) -> Digest {
        Digest {
            algo: "sha256".to_string(),
            hash: hash.to_string(),
        }
    }

    /// Accepts either a full digest or a bare hex string, which is taken to be sha256.
    pub fn parse_lenient(value: &str) -> Result<Digest, DigestError> {
        match value.contains(':') {
            true => value.parse(),
            false if is_hex(value) => Ok(Digest::sha256(value)),
            false => Err(DigestError(value.to_string())),
        }
    }
}

fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((algo, hash)) = s.split_once(':') else {
            return Err(DigestError(s.to_string()));
        };

        let valid_algo = !algo.is_empty()
            && algo
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c));

        if !valid_algo || !is_hex(hash) {
            return Err(DigestError(s.to_string()));
        }

        Ok(Digest {
            algo: algo.to_string(),
            hash: hash.to_string(),
        })
    }
}

// We implement this so that serde_json can parse a Digest from a straight string
impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        format!("{}", digest)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algo, self.hash)
    }
}
