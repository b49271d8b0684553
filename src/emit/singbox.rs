use serde::Serialize;

use crate::bucket::RuleBucket;
use crate::error::Result;
use crate::types::RuleKind;

/// Rule-set source format version (3 for sing-box 1.11+)
pub const DEFAULT_RULESET_VERSION: u32 = 3;

/// Kinds written to sing-box sources; `IpCidr6` is merged into `ip_cidr`
pub const EMITTED_KINDS: [RuleKind; 11] = RuleKind::ALL;

/// sing-box rule-set source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSetDocument {
    pub version: u32,
    pub rules: Vec<HeadlessRule>,
}

/// A default-type headless rule; empty fields are omitted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeadlessRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domain: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domain_suffix: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domain_keyword: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domain_regex: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_cidr: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub process_name: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub process_path: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_asn: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub geoip: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub geosite: Vec<String>,
}

impl HeadlessRule {
    /// True when the rule would contain only its `type`
    pub fn is_empty(&self) -> bool {
        self.domain.is_empty()
            && self.domain_suffix.is_empty()
            && self.domain_keyword.is_empty()
            && self.domain_regex.is_empty()
            && self.ip_cidr.is_empty()
            && self.process_name.is_empty()
            && self.process_path.is_empty()
            && self.ip_asn.is_empty()
            && self.geoip.is_empty()
            && self.geosite.is_empty()
    }
}

fn collect(bucket: &RuleBucket, kind: RuleKind) -> Vec<String> {
    bucket.values(kind).map(str::to_string).collect()
}

/// Build the source document for a bucket.
///
/// Values are sorted. Suffixes are written without a leading dot, which
/// sing-box treats as "the domain and its subdomains".
pub fn build(bucket: &RuleBucket, version: u32) -> RuleSetDocument {
    let mut ip_cidr: Vec<String> = bucket
        .values(RuleKind::IpCidr)
        .chain(bucket.values(RuleKind::IpCidr6))
        .map(str::to_string)
        .collect();
    ip_cidr.sort();
    ip_cidr.dedup();

    let rule = HeadlessRule {
        rule_type: "default".to_string(),
        domain: collect(bucket, RuleKind::Domain),
        domain_suffix: collect(bucket, RuleKind::DomainSuffix),
        domain_keyword: collect(bucket, RuleKind::DomainKeyword),
        domain_regex: collect(bucket, RuleKind::DomainRegex),
        ip_cidr,
        process_name: collect(bucket, RuleKind::ProcessName),
        process_path: collect(bucket, RuleKind::ProcessPath),
        ip_asn: collect(bucket, RuleKind::IpAsn),
        geoip: collect(bucket, RuleKind::GeoIp),
        geosite: collect(bucket, RuleKind::GeoSite),
    };

    let rules = if rule.is_empty() { Vec::new() } else { vec![rule] };
    RuleSetDocument { version, rules }
}

/// Render the source document as pretty JSON.
pub fn render(bucket: &RuleBucket, version: u32) -> Result<String> {
    let mut json = serde_json::to_string_pretty(&build(bucket, version))?;
    json.push('\n');
    Ok(json)
}
