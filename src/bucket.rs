//! Canonical rule set shared by both engine emitters.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use ipnet::IpNet;

use crate::types::RuleKind;

/// A single validated matcher
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuleEntry {
    pub kind: RuleKind,
    pub value: String,
}

impl RuleEntry {
    /// Validate and normalize a raw value for the given kind.
    ///
    /// Returns `None` for empty values and unparseable CIDRs. CIDR values are
    /// truncated to their network address and re-filed under `IpCidr` or
    /// `IpCidr6` by address family, so `IP-CIDR,2001:db8::/32` lands in the
    /// IPv6 set. Domain-ish values are lowercased; exact domains and suffixes
    /// lose any leading `+.` or `.`.
    pub fn parse(kind: RuleKind, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        match kind {
            RuleKind::IpCidr | RuleKind::IpCidr6 => {
                let net = parse_cidr(raw)?;
                let kind = match net {
                    IpNet::V4(_) => RuleKind::IpCidr,
                    IpNet::V6(_) => RuleKind::IpCidr6,
                };
                Some(Self {
                    kind,
                    value: net.trunc().to_string(),
                })
            }
            RuleKind::Domain | RuleKind::DomainSuffix => {
                let value = raw
                    .strip_prefix("+.")
                    .unwrap_or(raw)
                    .trim_start_matches('.')
                    .to_lowercase();
                (!value.is_empty()).then_some(Self { kind, value })
            }
            RuleKind::DomainKeyword => Some(Self {
                kind,
                value: raw.to_lowercase(),
            }),
            _ => Some(Self {
                kind,
                value: raw.to_string(),
            }),
        }
    }
}

/// Parse a CIDR or a bare IP address (treated as a host route).
pub fn parse_cidr(s: &str) -> Option<IpNet> {
    let s = s.trim();
    if let Ok(net) = s.parse::<IpNet>() {
        return Some(net);
    }
    s.parse::<IpAddr>().ok().map(IpNet::from)
}

/// Mapping from rule kind to its deduplicated values.
///
/// A kind is present only while it holds at least one value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleBucket {
    rules: BTreeMap<RuleKind, BTreeSet<String>>,
}

impl RuleBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert a raw value. Returns `true` if the value was new.
    pub fn insert(&mut self, kind: RuleKind, raw: &str) -> bool {
        match RuleEntry::parse(kind, raw) {
            Some(entry) => self.insert_entry(entry),
            None => false,
        }
    }

    /// Insert an already validated entry.
    pub fn insert_entry(&mut self, entry: RuleEntry) -> bool {
        self.rules.entry(entry.kind).or_default().insert(entry.value)
    }

    /// Values for a kind, sorted
    pub fn get(&self, kind: RuleKind) -> Option<&BTreeSet<String>> {
        self.rules.get(&kind)
    }

    /// Iterate over values of a kind (empty if absent)
    pub fn values(&self, kind: RuleKind) -> impl Iterator<Item = &str> {
        self.rules
            .get(&kind)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn contains(&self, kind: RuleKind, value: &str) -> bool {
        self.rules.get(&kind).is_some_and(|set| set.contains(value))
    }

    /// Number of values for a kind
    pub fn len_of(&self, kind: RuleKind) -> usize {
        self.rules.get(&kind).map_or(0, BTreeSet::len)
    }

    /// Total number of values across all kinds
    pub fn len(&self) -> usize {
        self.rules.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any of the given kinds holds a value
    pub fn has_any(&self, kinds: &[RuleKind]) -> bool {
        kinds.iter().any(|k| self.rules.contains_key(k))
    }

    /// Kinds present in the bucket, in `RuleKind` order
    pub fn kinds(&self) -> impl Iterator<Item = RuleKind> + '_ {
        self.rules.keys().copied()
    }

    /// Per-kind value counts
    pub fn counts(&self) -> BTreeMap<RuleKind, usize> {
        self.rules.iter().map(|(k, v)| (*k, v.len())).collect()
    }

    /// Merge another bucket into this one.
    pub fn merge(&mut self, other: RuleBucket) {
        for (kind, values) in other.rules {
            self.rules.entry(kind).or_default().extend(values);
        }
    }
}
