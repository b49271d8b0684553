use std::fmt;

use serde::Serialize;

use crate::bucket::RuleBucket;
use crate::error::Result;
use crate::types::RuleKind;

/// mihomo rule-set behavior used by `convert-ruleset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Behavior {
    Domain,
    IpCidr,
}

impl Behavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::Domain => "domain",
            Behavior::IpCidr => "ipcidr",
        }
    }

    /// Rule kinds representable under this behavior
    pub fn kinds(&self) -> &'static [RuleKind] {
        match self {
            Behavior::Domain => &[RuleKind::Domain, RuleKind::DomainSuffix],
            Behavior::IpCidr => &[RuleKind::IpCidr, RuleKind::IpCidr6],
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct Payload {
    payload: Vec<String>,
}

/// Bare payload values for a behavior, sorted.
///
/// Domain behavior writes exact domains as-is and suffixes as `+.suffix`.
pub fn payload(bucket: &RuleBucket, behavior: Behavior) -> Vec<String> {
    let mut values: Vec<String> = match behavior {
        Behavior::Domain => bucket
            .values(RuleKind::Domain)
            .map(str::to_string)
            .chain(bucket.values(RuleKind::DomainSuffix).map(|s| format!("+.{}", s)))
            .collect(),
        Behavior::IpCidr => bucket
            .values(RuleKind::IpCidr)
            .chain(bucket.values(RuleKind::IpCidr6))
            .map(str::to_string)
            .collect(),
    };
    values.sort();
    values.dedup();
    values
}

/// Kinds present in the bucket that no mihomo behavior can carry
pub fn unsupported_kinds(bucket: &RuleBucket) -> Vec<RuleKind> {
    bucket
        .kinds()
        .filter(|k| {
            !Behavior::Domain.kinds().contains(k) && !Behavior::IpCidr.kinds().contains(k)
        })
        .collect()
}

/// Render a `payload:` YAML source for a behavior.
pub fn render(bucket: &RuleBucket, behavior: Behavior) -> Result<String> {
    let doc = Payload {
        payload: payload(bucket, behavior),
    };
    Ok(serde_yaml::to_string(&doc)?)
}
