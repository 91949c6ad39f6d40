// Pre-hashed admin credentials for the server's ini configuration.
//
// Rendered as `-<algorithm>-<derived key hex>,<salt hex>,<iterations>`, the
// literal the server accepts in its `[admins]` section in place of a
// plaintext password.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Random salt size before hex encoding.
pub const SALT_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// PBKDF2-HMAC-SHA1, understood by every 2.x/3.x server.
    Pbkdf2Sha1,
    /// PBKDF2-HMAC-SHA256, the default from server 3.4 onwards.
    Pbkdf2Sha256,
}

impl HashAlgorithm {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Pbkdf2Sha1 => "pbkdf2",
            Self::Pbkdf2Sha256 => "pbkdf2:sha256",
        }
    }

    /// Derived key size in bytes.
    pub fn output_len(self) -> usize {
        match self {
            Self::Pbkdf2Sha1 => 20,
            Self::Pbkdf2Sha256 => 32,
        }
    }

    pub fn default_iterations(self) -> u32 {
        match self {
            Self::Pbkdf2Sha1 => 10,
            Self::Pbkdf2Sha256 => 600_000,
        }
    }

    /// Pick the scheme a given server release expects. Unparseable versions
    /// (`latest`, custom tags) are treated as current.
    pub fn for_server_version(version: &str) -> Self {
        let mut parts = version.trim().split('.').map(|part| part.parse::<u32>());
        match (parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor))) if (major, minor) < (3, 4) => Self::Pbkdf2Sha1,
            (Some(Ok(major)), None) if major < 3 => Self::Pbkdf2Sha1,
            _ => Self::Pbkdf2Sha256,
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "pbkdf2" => Some(Self::Pbkdf2Sha1),
            "pbkdf2:sha256" => Some(Self::Pbkdf2Sha256),
            _ => None,
        }
    }

    fn derive(self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut key = vec![0u8; self.output_len()];
        match self {
            Self::Pbkdf2Sha1 => pbkdf2::pbkdf2_hmac::<sha1::Sha1>(password, salt, iterations, &mut key),
            Self::Pbkdf2Sha256 => {
                pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password, salt, iterations, &mut key)
            }
        }
        key
    }
}

/// A decoded (or freshly derived) credential hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    pub algorithm: HashAlgorithm,
    pub derived_key_hex: String,
    pub salt_hex: String,
    pub iterations: u32,
}

impl HashRecord {
    /// Recompute the derivation for `plaintext` and compare.
    pub fn verify(&self, plaintext: &str) -> bool {
        let derived = self.algorithm.derive(plaintext.as_bytes(), self.salt_hex.as_bytes(), self.iterations);
        hex_encode(&derived).eq_ignore_ascii_case(&self.derived_key_hex)
    }
}

impl fmt::Display for HashRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "-{}-{},{},{}",
            self.algorithm.tag(),
            self.derived_key_hex,
            self.salt_hex,
            self.iterations
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashParseError {
    #[error("credential hash must start with `-<algorithm>-`")]
    MissingPrefix,
    #[error("unsupported credential hash algorithm `{0}`")]
    UnknownAlgorithm(String),
    #[error("credential hash must have exactly three comma-separated fields")]
    FieldCount,
    #[error("{field} is not valid hex")]
    InvalidHex { field: &'static str },
    #[error("derived key is {actual} hex characters, expected {expected}")]
    KeyLength { expected: usize, actual: usize },
    #[error("invalid iteration count `{0}`")]
    InvalidIterations(String),
}

impl FromStr for HashRecord {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix('-').ok_or(HashParseError::MissingPrefix)?;
        let (tag, fields) = rest.split_once('-').ok_or(HashParseError::MissingPrefix)?;
        let algorithm =
            HashAlgorithm::from_tag(tag).ok_or_else(|| HashParseError::UnknownAlgorithm(tag.to_string()))?;

        let parts: Vec<&str> = fields.split(',').collect();
        let [key, salt, iterations] = parts.as_slice() else {
            return Err(HashParseError::FieldCount);
        };

        if !is_hex(key) {
            return Err(HashParseError::InvalidHex { field: "derived key" });
        }
        if !is_hex(salt) {
            return Err(HashParseError::InvalidHex { field: "salt" });
        }
        let expected = algorithm.output_len() * 2;
        if key.len() != expected {
            return Err(HashParseError::KeyLength { expected, actual: key.len() });
        }
        let iterations = iterations
            .parse::<u32>()
            .ok()
            .filter(|count| *count > 0)
            .ok_or_else(|| HashParseError::InvalidIterations(iterations.to_string()))?;

        Ok(Self {
            algorithm,
            derived_key_hex: key.to_string(),
            salt_hex: salt.to_string(),
            iterations,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHasher {
    algorithm: HashAlgorithm,
    iterations: u32,
}

impl PasswordHasher {
    pub fn new(algorithm: HashAlgorithm, iterations: u32) -> Self {
        Self { algorithm, iterations: iterations.max(1) }
    }

    pub fn for_server_version(version: &str) -> Self {
        let algorithm = HashAlgorithm::for_server_version(version);
        Self::new(algorithm, algorithm.default_iterations())
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash with a fresh random salt. Output differs on every call.
    pub fn hash(&self, plaintext: &str) -> HashRecord {
        let mut salt = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut salt);
        self.hash_with_salt(plaintext, &hex_encode(&salt))
    }

    /// The server feeds the salt field's text to the KDF as-is, so the hex
    /// string itself (not its decoded bytes) is the salt.
    pub fn hash_with_salt(&self, plaintext: &str, salt_hex: &str) -> HashRecord {
        let derived = self.algorithm.derive(plaintext.as_bytes(), salt_hex.as_bytes(), self.iterations);
        HashRecord {
            algorithm: self.algorithm,
            derived_key_hex: hex_encode(&derived),
            salt_hex: salt_hex.to_string(),
            iterations: self.iterations,
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.len() % 2 == 0 && value.bytes().all(|b| b.is_ascii_hexdigit())
}
