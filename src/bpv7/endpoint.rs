use serde::{Deserialize, Serialize};
use std::fmt;

/// An error produced while parsing an endpoint identifier.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointIdError {
    #[error("unrecognized URI scheme: {0}")]
    UnknownScheme(String),
    #[error("empty authority in endpoint identifier")]
    EmptyAuthority,
    #[error("non-ASCII characters in dtn-scheme endpoint identifier")]
    NonAscii,
    #[error("malformed ipn endpoint identifier: {0}")]
    MalformedIpn(String),
}

/// Endpoint Identifier (EID) as defined in BPv7 (RFC 9171 section 4.2.5).
///
/// Three shapes are recognized: `dtn://<node>[/<demux>...]`, `ipn:<node>.<service>`,
/// and the distinguished null endpoint `dtn:none`. Equality and hashing are on the
/// canonicalized string form (trailing `/` normalized away on `dtn` authorities,
/// case otherwise preserved).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EndpointId {
    None,
    Dtn { node: String, demux: String },
    Ipn { node: u64, service: u64 },
}

impl EndpointId {
    pub fn parse(s: &str) -> Result<Self, EndpointIdError> {
        if s == "dtn:none" {
            return Ok(EndpointId::None);
        }
        if let Some(rest) = s.strip_prefix("dtn://") {
            if !rest.is_ascii() {
                return Err(EndpointIdError::NonAscii);
            }
            let (node, demux) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, ""),
            };
            if node.is_empty() {
                return Err(EndpointIdError::EmptyAuthority);
            }
            let demux = demux.trim_end_matches('/').to_string();
            return Ok(EndpointId::Dtn {
                node: node.to_string(),
                demux,
            });
        }
        if let Some(rest) = s.strip_prefix("ipn:") {
            let mut parts = rest.splitn(2, '.');
            let node = parts.next().unwrap_or("");
            let service = parts
                .next()
                .ok_or_else(|| EndpointIdError::MalformedIpn(s.to_string()))?;
            let node: u64 = node
                .parse()
                .map_err(|_| EndpointIdError::MalformedIpn(s.to_string()))?;
            let service: u64 = service
                .parse()
                .map_err(|_| EndpointIdError::MalformedIpn(s.to_string()))?;
            return Ok(EndpointId::Ipn { node, service });
        }
        Err(EndpointIdError::UnknownScheme(s.to_string()))
    }

    /// Convenience constructor for call sites that already know the string is
    /// well-formed (config loading after validation, tests). Panics otherwise;
    /// prefer `parse` at an actual trust boundary.
    pub fn from(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|e| panic!("invalid endpoint id {s:?}: {e}"))
    }

    pub fn dtn_node(node: impl Into<String>) -> Self {
        EndpointId::Dtn {
            node: node.into(),
            demux: String::new(),
        }
    }

    pub fn none() -> Self {
        EndpointId::None
    }

    pub fn is_none(&self) -> bool {
        matches!(self, EndpointId::None)
    }

    /// The node portion of the EID (empty for `dtn:none`).
    pub fn node_part(&self) -> String {
        match self {
            EndpointId::None => String::new(),
            EndpointId::Dtn { node, .. } => node.clone(),
            EndpointId::Ipn { node, .. } => node.to_string(),
        }
    }

    /// Full canonical string form, e.g. `dtn://node/demux` or `ipn:1.2`.
    pub fn description(&self) -> String {
        match self {
            EndpointId::None => "dtn:none".to_string(),
            EndpointId::Dtn { node, demux } => {
                if demux.is_empty() {
                    format!("dtn://{node}")
                } else {
                    format!("dtn://{node}{demux}")
                }
            }
            EndpointId::Ipn { node, service } => format!("ipn:{node}.{service}"),
        }
    }

    /// Match this endpoint against a routing/registration pattern (spec section 3).
    ///
    /// - `dtn:none` matches nothing.
    /// - A pattern ending in `/*` is a prefix match on the node+demux string.
    /// - A pattern containing `/~<group>` matches any endpoint with the same
    ///   node and the same group prefix (group-endpoint semantics).
    /// - Otherwise, exact canonical equality.
    pub fn matches(&self, pattern: &str) -> bool {
        if self.is_none() {
            return false;
        }
        let me = self.description();
        if let Some(prefix) = pattern.strip_suffix("/*") {
            return me == prefix || me.starts_with(&format!("{prefix}/"));
        }
        if let Some(tilde_idx) = pattern.find("/~") {
            let (pat_node, group_and_rest) = pattern.split_at(tilde_idx);
            let group = group_and_rest.trim_start_matches("/~");
            if let EndpointId::Dtn { node, demux } = self {
                let pat_node = pat_node.trim_end_matches('/');
                let pat_node = pat_node.strip_prefix("dtn://").unwrap_or(pat_node);
                return node == pat_node && demux.trim_start_matches('/').starts_with(group);
            }
            return false;
        }
        me == pattern
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl TryFrom<String> for EndpointId {
    type Error = EndpointIdError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        EndpointId::parse(&value)
    }
}

impl From<EndpointId> for String {
    fn from(value: EndpointId) -> Self {
        value.description()
    }
}

impl TryFrom<&str> for EndpointId {
    type Error = EndpointIdError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        EndpointId::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dtn_none() {
        assert_eq!(EndpointId::parse("dtn:none").unwrap(), EndpointId::None);
    }

    #[test]
    fn test_parse_dtn_with_demux_strips_trailing_slash() {
        let a = EndpointId::parse("dtn://node/app/").unwrap();
        let b = EndpointId::parse("dtn://node/app").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.description(), "dtn://node/app");
    }

    #[test]
    fn test_parse_dtn_rejects_empty_authority() {
        assert_eq!(EndpointId::parse("dtn://"), Err(EndpointIdError::EmptyAuthority));
    }

    #[test]
    fn test_parse_ipn_scheme() {
        let eid = EndpointId::parse("ipn:1.2").unwrap();
        assert_eq!(eid, EndpointId::Ipn { node: 1, service: 2 });
        assert_eq!(eid.description(), "ipn:1.2");
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        assert!(matches!(
            EndpointId::parse("http://node"),
            Err(EndpointIdError::UnknownScheme(_))
        ));
    }

    #[test]
    fn test_matches_wildcard_suffix() {
        let eid = EndpointId::parse("dtn://node/app/inbox").unwrap();
        assert!(eid.matches("dtn://node/app/*"));
        assert!(!eid.matches("dtn://other/*"));
    }

    #[test]
    fn test_matches_group_endpoint() {
        let eid = EndpointId::parse("dtn://node/group/member").unwrap();
        assert!(eid.matches("dtn://node/~group"));
    }

    #[test]
    fn test_dtn_none_matches_nothing() {
        assert!(!EndpointId::none().matches("dtn:none"));
    }
}
