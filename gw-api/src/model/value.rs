//! Typed accessors layered over the canonical string storage used by
//! [`super::Resource`] and [`super::Metadata`] values.
//!
//! Every value is stored as `Option<String>`; drivers and callers that
//! know the resource's `ResourceType` recover a typed value with
//! [`Typed::parse`] and format one back with [`Typed::format`].

use crate::types::Error;
use std::fmt;
use std::str::FromStr;

/// A type that can be carried as a resource or metadata value.
pub trait Typed: Sized {
    fn parse(s: &str) -> Result<Self, Error>;
    fn format(&self) -> String;
}

impl Typed for bool {
    fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(Error::TypeError),
        }
    }

    fn format(&self) -> String {
        self.to_string()
    }
}

impl Typed for i64 {
    fn parse(s: &str) -> Result<Self, Error> {
        s.parse().map_err(|_| Error::TypeError)
    }

    fn format(&self) -> String {
        self.to_string()
    }
}

impl Typed for f64 {
    fn parse(s: &str) -> Result<Self, Error> {
        s.parse().map_err(|_| Error::TypeError)
    }

    fn format(&self) -> String {
        self.to_string()
    }
}

impl Typed for String {
    fn parse(s: &str) -> Result<Self, Error> {
        Ok(s.to_string())
    }

    fn format(&self) -> String {
        self.clone()
    }
}

/// A 6-byte hardware address, formatted `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress([u8; 6]);

impl Typed for MacAddress {
    fn parse(s: &str) -> Result<Self, Error> {
        s.parse()
    }

    fn format(&self) -> String {
        self.to_string()
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');

        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(Error::TypeError)?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| Error::TypeError)?;
        }
        if parts.next().is_some() {
            return Err(Error::TypeError);
        }
        Ok(MacAddress(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

/// Parses a resource/metadata value, interpreting a missing value as
/// `None` rather than an error.
pub fn parse_opt<T: Typed>(v: &Option<String>) -> Result<Option<T>, Error> {
    v.as_deref().map(T::parse).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_roundtrip() {
        assert_eq!(bool::parse("true").unwrap(), true);
        assert!(bool::parse("yes").is_err());
        assert_eq!(true.format(), "true");
    }

    #[test]
    fn test_mac_roundtrip() {
        let mac: MacAddress = "00:17:88:aa:bb:cc".parse().unwrap();

        assert_eq!(mac.format(), "00:17:88:aa:bb:cc");
        assert!(MacAddress::parse("00:17:88").is_err());
    }

    #[test]
    fn test_parse_opt_missing_is_none() {
        let v: Option<String> = None;

        assert_eq!(parse_opt::<i64>(&v).unwrap(), None);
    }
}
