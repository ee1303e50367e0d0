//! Validated URIs addressing devices, endpoints, resources, and
//! metadata.
//!
//! A URI always has the shape:
//!
//! ```text
//! "/" uuid ("/ep/" endpoint-id)? ("/r/" resource-id | "/m/" metadata-id)?
//! ```
//!
//! Segments (`uuid`, `endpoint-id`, `resource-id`, `metadata-id`) may
//! not be empty and may not contain `/` or `*`; `*` is reserved for
//! [`UriPattern`] and is never part of a stored `Uri`.

use crate::types::Error;
use std::fmt;
use std::str::FromStr;

fn validate_id(s: &str) -> Result<(), Error> {
    if s.is_empty() {
        return Err(Error::InvalidArgument(String::from(
            "id segment is empty",
        )));
    }
    if s.contains('/') || s.contains('*') {
        return Err(Error::InvalidArgument(format!(
            "id segment '{}' contains '/' or '*'",
            s
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Owner {
    Device(String),
    Endpoint(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Child {
    None,
    Resource(String),
    Metadata(String),
}

/// A fully-resolved, validated address of a device, an endpoint, a
/// resource, or a metadata entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    owner: Owner,
    child: Child,
}

impl Uri {
    /// Builds the URI of a device.
    pub fn device(uuid: &str) -> Result<Uri, Error> {
        validate_id(uuid)?;
        Ok(Uri {
            owner: Owner::Device(uuid.to_string()),
            child: Child::None,
        })
    }

    /// Builds the URI of an endpoint.
    pub fn endpoint(uuid: &str, ep_id: &str) -> Result<Uri, Error> {
        validate_id(uuid)?;
        validate_id(ep_id)?;
        Ok(Uri {
            owner: Owner::Endpoint(uuid.to_string(), ep_id.to_string()),
            child: Child::None,
        })
    }

    /// Builds the URI of a device-level resource.
    pub fn device_resource(uuid: &str, res_id: &str) -> Result<Uri, Error> {
        validate_id(uuid)?;
        validate_id(res_id)?;
        Ok(Uri {
            owner: Owner::Device(uuid.to_string()),
            child: Child::Resource(res_id.to_string()),
        })
    }

    /// Builds the URI of an endpoint-level resource.
    pub fn endpoint_resource(
        uuid: &str,
        ep_id: &str,
        res_id: &str,
    ) -> Result<Uri, Error> {
        validate_id(uuid)?;
        validate_id(ep_id)?;
        validate_id(res_id)?;
        Ok(Uri {
            owner: Owner::Endpoint(uuid.to_string(), ep_id.to_string()),
            child: Child::Resource(res_id.to_string()),
        })
    }

    /// Builds the URI of a device-level metadata entry.
    pub fn device_metadata(uuid: &str, meta_id: &str) -> Result<Uri, Error> {
        validate_id(uuid)?;
        validate_id(meta_id)?;
        Ok(Uri {
            owner: Owner::Device(uuid.to_string()),
            child: Child::Metadata(meta_id.to_string()),
        })
    }

    /// Builds the URI of an endpoint-level metadata entry.
    pub fn endpoint_metadata(
        uuid: &str,
        ep_id: &str,
        meta_id: &str,
    ) -> Result<Uri, Error> {
        validate_id(uuid)?;
        validate_id(ep_id)?;
        validate_id(meta_id)?;
        Ok(Uri {
            owner: Owner::Endpoint(uuid.to_string(), ep_id.to_string()),
            child: Child::Metadata(meta_id.to_string()),
        })
    }

    /// Returns the uuid of the device that owns this URI, regardless
    /// of whether the URI addresses the device itself or one of its
    /// endpoints/resources/metadata.
    pub fn device_uuid(&self) -> &str {
        match &self.owner {
            Owner::Device(uuid) => uuid,
            Owner::Endpoint(uuid, _) => uuid,
        }
    }

    /// Returns the endpoint id, if this URI is scoped to an endpoint.
    pub fn endpoint_id(&self) -> Option<&str> {
        match &self.owner {
            Owner::Device(_) => None,
            Owner::Endpoint(_, ep) => Some(ep),
        }
    }

    /// Returns the trailing resource/metadata id, if any.
    pub fn leaf_id(&self) -> Option<&str> {
        match &self.child {
            Child::None => None,
            Child::Resource(id) => Some(id),
            Child::Metadata(id) => Some(id),
        }
    }

    pub fn is_resource(&self) -> bool {
        matches!(self.child, Child::Resource(_))
    }

    pub fn is_metadata(&self) -> bool {
        matches!(self.child, Child::Metadata(_))
    }

    /// Returns the URI of the device that owns this URI (drops the
    /// endpoint and resource/metadata suffix). Used by the
    /// endpoint-to-device resource-fallback lookup (§4.1).
    pub fn root_device(&self) -> Uri {
        Uri {
            owner: Owner::Device(self.device_uuid().to_string()),
            child: self.child.clone(),
        }
    }

    /// `true` if this URI addresses a bare device (no endpoint, no
    /// resource, no metadata).
    pub fn is_device(&self) -> bool {
        matches!(self.owner, Owner::Device(_)) && matches!(self.child, Child::None)
    }

    /// `true` if this URI addresses a bare endpoint.
    pub fn is_endpoint(&self) -> bool {
        matches!(self.owner, Owner::Endpoint(..)) && matches!(self.child, Child::None)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Owner::Device(uuid) => write!(f, "/{}", uuid)?,
            Owner::Endpoint(uuid, ep) => write!(f, "/{}/ep/{}", uuid, ep)?,
        }
        match &self.child {
            Child::None => Ok(()),
            Child::Resource(id) => write!(f, "/r/{}", id),
            Child::Metadata(id) => write!(f, "/m/{}", id),
        }
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let bad = || {
            Error::InvalidArgument(format!("malformed uri '{}'", s))
        };

        let rest = s.strip_prefix('/').ok_or_else(bad)?;
        let mut parts = rest.split('/');

        let uuid = parts.next().ok_or_else(bad)?;
        validate_id(uuid)?;

        match parts.next() {
            None => Ok(Uri {
                owner: Owner::Device(uuid.to_string()),
                child: Child::None,
            }),
            Some("ep") => {
                let ep_id = parts.next().ok_or_else(bad)?;
                validate_id(ep_id)?;

                let owner = Owner::Endpoint(uuid.to_string(), ep_id.to_string());

                match parts.next() {
                    None => Ok(Uri {
                        owner,
                        child: Child::None,
                    }),
                    Some("r") => {
                        let id = parts.next().ok_or_else(bad)?;
                        validate_id(id)?;
                        if parts.next().is_some() {
                            return Err(bad());
                        }
                        Ok(Uri {
                            owner,
                            child: Child::Resource(id.to_string()),
                        })
                    }
                    Some("m") => {
                        let id = parts.next().ok_or_else(bad)?;
                        validate_id(id)?;
                        if parts.next().is_some() {
                            return Err(bad());
                        }
                        Ok(Uri {
                            owner,
                            child: Child::Metadata(id.to_string()),
                        })
                    }
                    _ => Err(bad()),
                }
            }
            Some("r") => {
                let id = parts.next().ok_or_else(bad)?;
                validate_id(id)?;
                if parts.next().is_some() {
                    return Err(bad());
                }
                Ok(Uri {
                    owner: Owner::Device(uuid.to_string()),
                    child: Child::Resource(id.to_string()),
                })
            }
            Some("m") => {
                let id = parts.next().ok_or_else(bad)?;
                validate_id(id)?;
                if parts.next().is_some() {
                    return Err(bad());
                }
                Ok(Uri {
                    owner: Owner::Device(uuid.to_string()),
                    child: Child::Metadata(id.to_string()),
                })
            }
            _ => Err(bad()),
        }
    }
}

/// A URI that may contain `*` wildcard segments in its final
/// component. Only ever used for queries (`writeResourceByUri`,
/// `getResourcesByUriRegex`); never stored as device state.
#[derive(Debug, Clone)]
pub struct UriPattern(String);

impl UriPattern {
    pub fn new(s: &str) -> UriPattern {
        UriPattern(s.to_string())
    }

    pub fn contains_wildcard(&self) -> bool {
        self.0.contains('*')
    }

    /// Expands `*` into `.*` and anchors the pattern, for use with the
    /// store's `*Regex` query variants (§4.1).
    pub fn to_regex(&self) -> Result<regex::Regex, Error> {
        let mut pat = String::with_capacity(self.0.len() + 8);

        pat.push('^');
        for part in self.0.split('*') {
            pat.push_str(&regex::escape(part));
            pat.push_str(".*");
        }
        // Drop the trailing ".*" we added one time too many, then
        // anchor.
        pat.truncate(pat.len() - 2);
        pat.push('$');

        regex::Regex::new(&pat)
            .map_err(|e| Error::InvalidArgument(format!("bad pattern: {}", e)))
    }
}

impl fmt::Display for UriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_uri() {
        let u = "/001788AABBCC".parse::<Uri>().unwrap();

        assert!(u.is_device());
        assert_eq!(u.device_uuid(), "001788AABBCC");
        assert_eq!(format!("{}", u), "/001788AABBCC");
    }

    #[test]
    fn test_endpoint_resource_uri() {
        let u = "/001788AABBCC/ep/1/r/isOn".parse::<Uri>().unwrap();

        assert_eq!(u.device_uuid(), "001788AABBCC");
        assert_eq!(u.endpoint_id(), Some("1"));
        assert_eq!(u.leaf_id(), Some("isOn"));
        assert!(u.is_resource());
        assert_eq!(format!("{}", u), "/001788AABBCC/ep/1/r/isOn");
    }

    #[test]
    fn test_metadata_uri() {
        let u = "/abc/m/note".parse::<Uri>().unwrap();

        assert!(u.is_metadata());
        assert_eq!(u.leaf_id(), Some("note"));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("".parse::<Uri>().is_err());
        assert!("no-leading-slash".parse::<Uri>().is_err());
        assert!("/a/ep".parse::<Uri>().is_err());
        assert!("/a/ep/1/x/y".parse::<Uri>().is_err());
        assert!(Uri::device_resource("a", "has/slash").is_err());
        assert!(Uri::device_resource("a", "has*star").is_err());
        assert!(Uri::device("").is_err());
    }

    #[test]
    fn test_root_device_fallback() {
        let ep_res = "/abc/ep/1/r/label".parse::<Uri>().unwrap();
        let root = ep_res.root_device();

        assert_eq!(format!("{}", root), "/abc/r/label");
    }

    #[test]
    fn test_pattern_to_regex() {
        let p = UriPattern::new("*/label");
        let re = p.to_regex().unwrap();

        assert!(re.is_match("/abc/ep/1/r/label"));
        assert!(!re.is_match("/abc/ep/1/r/isOn"));
    }
}
