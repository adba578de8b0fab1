//! Typed parameter lists passed across the provider boundary.
//!
//! A [`Params`] value plays the role of the zero-terminated key/value array
//! in the original ABI: set-style calls carry filled values, get-style calls
//! carry requested keys that the callee fills in. Missing keys are silently
//! skipped; a caller that considers a key required checks for it afterwards.

use std::fmt;

/// Well-known parameter keys.
pub mod keys {
    /// Digest output size in bytes (`usize`).
    pub const DIGEST_SIZE: &str = "size";
    /// Digest block size in bytes (`usize`).
    pub const DIGEST_BLOCK_SIZE: &str = "blocksize";

    /// Key-exchange zero-padding toggle (integer, nonzero = pad).
    pub const EXCHANGE_PAD: &str = "pad";

    /// DH prime modulus (big-endian unsigned bytes).
    pub const PKEY_DH_P: &str = "p";
    /// DH generator (big-endian unsigned bytes).
    pub const PKEY_DH_G: &str = "g";
    /// DH public value (big-endian unsigned bytes).
    pub const PKEY_DH_PUB: &str = "pub";
    /// DH private exponent (big-endian unsigned bytes).
    pub const PKEY_DH_PRIV: &str = "priv";

    /// Runtime core version, reported to providers at init (UTF-8).
    pub const CORE_VERSION: &str = "core-version";

    /// Provider name (UTF-8).
    pub const PROV_NAME: &str = "name";
    /// Provider version (UTF-8).
    pub const PROV_VERSION: &str = "version";
    /// Provider build info (UTF-8).
    pub const PROV_BUILDINFO: &str = "buildinfo";
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    Uint(u64),
    /// Size in bytes or elements.
    Size(usize),
    /// Unsigned big number, big-endian bytes.
    Bn(Vec<u8>),
    /// UTF-8 string.
    Utf8(String),
    /// Raw octet string.
    Octets(Vec<u8>),
}

impl ParamValue {
    /// Encoded length of the value in bytes, as reported back by get-style
    /// calls.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Int(_) | Self::Uint(_) => std::mem::size_of::<u64>(),
            Self::Size(_) => std::mem::size_of::<usize>(),
            Self::Bn(b) | Self::Octets(b) => b.len(),
            Self::Utf8(s) => s.len(),
        }
    }
}

/// One parameter slot.
#[derive(Debug, Clone)]
pub struct Param {
    key: String,
    value: Option<ParamValue>,
    returned: Option<usize>,
}

impl Param {
    /// The slot's key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The slot's value; `None` for an unfilled request slot.
    #[must_use]
    pub fn value(&self) -> Option<&ParamValue> {
        self.value.as_ref()
    }

    /// Length written by the last get-style call that filled this slot.
    #[must_use]
    pub fn returned_len(&self) -> Option<usize> {
        self.returned
    }
}

/// An ordered parameter list.
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: Vec<Param>,
}

impl Params {
    /// An empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A list of unfilled request slots, for get-style calls.
    #[must_use]
    pub fn request<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            entries: keys
                .into_iter()
                .map(|key| Param {
                    key: key.to_owned(),
                    value: None,
                    returned: None,
                })
                .collect(),
        }
    }

    fn push(mut self, key: &str, value: ParamValue) -> Self {
        self.entries.push(Param {
            key: key.to_owned(),
            value: Some(value),
            returned: None,
        });
        self
    }

    /// Appends a signed integer parameter.
    #[must_use]
    pub fn with_int(self, key: &str, value: i64) -> Self {
        self.push(key, ParamValue::Int(value))
    }

    /// Appends an unsigned integer parameter.
    #[must_use]
    pub fn with_uint(self, key: &str, value: u64) -> Self {
        self.push(key, ParamValue::Uint(value))
    }

    /// Appends a size parameter.
    #[must_use]
    pub fn with_size(self, key: &str, value: usize) -> Self {
        self.push(key, ParamValue::Size(value))
    }

    /// Appends a big-number parameter (big-endian unsigned bytes).
    #[must_use]
    pub fn with_bn(self, key: &str, value: &[u8]) -> Self {
        self.push(key, ParamValue::Bn(value.to_vec()))
    }

    /// Appends a UTF-8 string parameter.
    #[must_use]
    pub fn with_utf8(self, key: &str, value: &str) -> Self {
        self.push(key, ParamValue::Utf8(value.to_owned()))
    }

    /// Appends an octet-string parameter.
    #[must_use]
    pub fn with_octets(self, key: &str, value: &[u8]) -> Self {
        self.push(key, ParamValue::Octets(value.to_vec()))
    }

    /// All slots, in order.
    #[must_use]
    pub fn entries(&self) -> &[Param] {
        &self.entries
    }

    /// True when the list has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Locates a slot by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Param> {
        self.entries.iter().find(|p| p.key == key)
    }

    fn get_value(&self, key: &str) -> Option<&ParamValue> {
        self.get(key).and_then(Param::value)
    }

    /// Reads a signed integer, coercing the unsigned kinds when they fit.
    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get_value(key)? {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Uint(u) => i64::try_from(*u).ok(),
            ParamValue::Size(s) => i64::try_from(*s).ok(),
            _ => None,
        }
    }

    /// Reads an unsigned integer, coercing non-negative signed values.
    #[must_use]
    pub fn get_uint(&self, key: &str) -> Option<u64> {
        match self.get_value(key)? {
            ParamValue::Uint(u) => Some(*u),
            ParamValue::Int(i) => u64::try_from(*i).ok(),
            ParamValue::Size(s) => Some(*s as u64),
            _ => None,
        }
    }

    /// Reads a size, coercing the other integer kinds when they fit.
    #[must_use]
    pub fn get_size(&self, key: &str) -> Option<usize> {
        match self.get_value(key)? {
            ParamValue::Size(s) => Some(*s),
            ParamValue::Uint(u) => usize::try_from(*u).ok(),
            ParamValue::Int(i) => usize::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Reads a big number as big-endian bytes.
    #[must_use]
    pub fn get_bn(&self, key: &str) -> Option<&[u8]> {
        match self.get_value(key)? {
            ParamValue::Bn(b) => Some(b),
            _ => None,
        }
    }

    /// Reads a UTF-8 string.
    #[must_use]
    pub fn get_utf8(&self, key: &str) -> Option<&str> {
        match self.get_value(key)? {
            ParamValue::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// Reads an octet string.
    #[must_use]
    pub fn get_octets(&self, key: &str) -> Option<&[u8]> {
        match self.get_value(key)? {
            ParamValue::Octets(b) => Some(b),
            _ => None,
        }
    }

    /// Fills a requested slot, recording the produced length.
    ///
    /// Returns false (and does nothing) when the key was not requested;
    /// get-style callees skip keys they do not know the same way.
    pub fn set(&mut self, key: &str, value: ParamValue) -> bool {
        match self.entries.iter_mut().find(|p| p.key == key) {
            Some(param) => {
                param.returned = Some(value.byte_len());
                param.value = Some(value);
                true
            }
            None => false,
        }
    }

    /// Fills a requested slot with a signed integer.
    pub fn set_int(&mut self, key: &str, value: i64) -> bool {
        self.set(key, ParamValue::Int(value))
    }

    /// Fills a requested slot with a size.
    pub fn set_size(&mut self, key: &str, value: usize) -> bool {
        self.set(key, ParamValue::Size(value))
    }

    /// Fills a requested slot with a big number.
    pub fn set_bn(&mut self, key: &str, value: &[u8]) -> bool {
        self.set(key, ParamValue::Bn(value.to_vec()))
    }

    /// Fills a requested slot with a UTF-8 string.
    pub fn set_utf8(&mut self, key: &str, value: &str) -> bool {
        self.set(key, ParamValue::Utf8(value.to_owned()))
    }

    /// Fills a requested slot with an octet string.
    pub fn set_octets(&mut self, key: &str, value: &[u8]) -> bool {
        self.set(key, ParamValue::Octets(value.to_vec()))
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.entries.iter().map(|p| p.key.as_str()).collect();
        write!(f, "[{}]", keys.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_read_back() {
        let params = Params::new()
            .with_int(keys::EXCHANGE_PAD, 1)
            .with_bn(keys::PKEY_DH_P, &[0x01, 0x02])
            .with_utf8(keys::PROV_NAME, "default");
        assert_eq!(params.get_int(keys::EXCHANGE_PAD), Some(1));
        assert_eq!(params.get_bn(keys::PKEY_DH_P), Some(&[0x01, 0x02][..]));
        assert_eq!(params.get_utf8(keys::PROV_NAME), Some("default"));
        assert_eq!(params.get_bn("missing"), None);
    }

    #[test]
    fn integer_coercion_is_lossless_only() {
        let params = Params::new()
            .with_uint("a", u64::MAX)
            .with_int("b", -1)
            .with_size("c", 32);
        assert_eq!(params.get_int("a"), None);
        assert_eq!(params.get_uint("b"), None);
        assert_eq!(params.get_int("c"), Some(32));
        assert_eq!(params.get_size("b"), None);
    }

    #[test]
    fn request_slots_fill_and_report_length() {
        let mut params = Params::request([keys::DIGEST_SIZE, keys::PROV_NAME]);
        assert_eq!(params.get_size(keys::DIGEST_SIZE), None);

        assert!(params.set_size(keys::DIGEST_SIZE, 32));
        assert!(params.set_utf8(keys::PROV_NAME, "default"));
        // Unknown keys are skipped, not invented.
        assert!(!params.set_int("unknown", 1));

        assert_eq!(params.get_size(keys::DIGEST_SIZE), Some(32));
        assert_eq!(
            params.get(keys::PROV_NAME).unwrap().returned_len(),
            Some("default".len())
        );
        assert_eq!(params.entries().len(), 2);
    }

    #[test]
    fn wrong_type_reads_as_none() {
        let params = Params::new().with_utf8("k", "text");
        assert_eq!(params.get_int("k"), None);
        assert_eq!(params.get_bn("k"), None);
        assert_eq!(params.get_octets("k"), None);
    }
}
