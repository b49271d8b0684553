use std::fmt;
use std::str::FromStr;

use crate::error::ForgeError;

/// Matcher kind of a single rule entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleKind {
    Domain,
    DomainSuffix,
    DomainKeyword,
    DomainRegex,
    IpCidr,
    IpCidr6,
    ProcessName,
    ProcessPath,
    IpAsn,
    GeoIp,
    GeoSite,
}

impl RuleKind {
    /// Every kind, in serialization order
    pub const ALL: [RuleKind; 11] = [
        RuleKind::Domain,
        RuleKind::DomainSuffix,
        RuleKind::DomainKeyword,
        RuleKind::DomainRegex,
        RuleKind::IpCidr,
        RuleKind::IpCidr6,
        RuleKind::ProcessName,
        RuleKind::ProcessPath,
        RuleKind::IpAsn,
        RuleKind::GeoIp,
        RuleKind::GeoSite,
    ];

    /// Kinds accepted by the rule extractor; every other rule type is dropped
    pub const EXTRACTED: [RuleKind; 7] = [
        RuleKind::Domain,
        RuleKind::DomainSuffix,
        RuleKind::DomainKeyword,
        RuleKind::DomainRegex,
        RuleKind::IpCidr,
        RuleKind::IpCidr6,
        RuleKind::ProcessName,
    ];

    /// Clash rule type keyword, e.g. `DOMAIN-SUFFIX`
    pub fn clash_type(&self) -> &'static str {
        match self {
            RuleKind::Domain => "DOMAIN",
            RuleKind::DomainSuffix => "DOMAIN-SUFFIX",
            RuleKind::DomainKeyword => "DOMAIN-KEYWORD",
            RuleKind::DomainRegex => "DOMAIN-REGEX",
            RuleKind::IpCidr => "IP-CIDR",
            RuleKind::IpCidr6 => "IP-CIDR6",
            RuleKind::ProcessName => "PROCESS-NAME",
            RuleKind::ProcessPath => "PROCESS-PATH",
            RuleKind::IpAsn => "IP-ASN",
            RuleKind::GeoIp => "GEOIP",
            RuleKind::GeoSite => "GEOSITE",
        }
    }

    /// Field name in a sing-box headless rule, e.g. `domain_suffix`
    pub fn field_name(&self) -> &'static str {
        match self {
            RuleKind::Domain => "domain",
            RuleKind::DomainSuffix => "domain_suffix",
            RuleKind::DomainKeyword => "domain_keyword",
            RuleKind::DomainRegex => "domain_regex",
            RuleKind::IpCidr => "ip_cidr",
            RuleKind::IpCidr6 => "ip_cidr6",
            RuleKind::ProcessName => "process_name",
            RuleKind::ProcessPath => "process_path",
            RuleKind::IpAsn => "ip_asn",
            RuleKind::GeoIp => "geoip",
            RuleKind::GeoSite => "geosite",
        }
    }

    /// Look up an extractable kind by its clash type keyword (case-insensitive)
    pub fn from_clash_type(keyword: &str) -> Option<Self> {
        let keyword = keyword.trim();
        Self::EXTRACTED
            .into_iter()
            .find(|k| k.clash_type().eq_ignore_ascii_case(keyword))
    }

    /// Look up an extractable kind by its sing-box field name
    pub fn from_field_name(field: &str) -> Option<Self> {
        Self::EXTRACTED.into_iter().find(|k| k.field_name() == field)
    }

    pub fn is_cidr(&self) -> bool {
        matches!(self, RuleKind::IpCidr | RuleKind::IpCidr6)
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Normalized source text format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    /// Clash rule provider: `payload:`/`rules:` YAML or `TYPE,VALUE` lines
    Clash,
    /// One bare domain per line
    DomainText,
    /// One CIDR per line
    IpText,
    /// sing-box rule-set source JSON
    SingboxJson,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Clash => "clash",
            SourceFormat::DomainText => "domain-text",
            SourceFormat::IpText => "ip-text",
            SourceFormat::SingboxJson => "singbox-json",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-supplied format hint from the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatHint {
    /// Detect the format from content
    #[default]
    Auto,
    /// Use this format unconditionally
    Fixed(SourceFormat),
}

impl FromStr for FormatHint {
    type Err = ForgeError;

    /// Accepts `auto`, `clash`, `domain-text`, `ip-text`, `singbox-json`,
    /// case-insensitively and with `_` in place of `-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "" | "auto" => Ok(FormatHint::Auto),
            "clash" => Ok(FormatHint::Fixed(SourceFormat::Clash)),
            "domain-text" => Ok(FormatHint::Fixed(SourceFormat::DomainText)),
            "ip-text" => Ok(FormatHint::Fixed(SourceFormat::IpText)),
            "singbox-json" => Ok(FormatHint::Fixed(SourceFormat::SingboxJson)),
            _ => Err(ForgeError::Manifest(format!("Unknown format: {}", s))),
        }
    }
}

impl fmt::Display for FormatHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatHint::Auto => f.write_str("auto"),
            FormatHint::Fixed(format) => format.fmt(f),
        }
    }
}

/// A named remote rule list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Artifact base name, unique within a manifest
    pub name: String,
    /// Location of the raw rule text
    pub url: String,
    /// Format hint
    pub format: FormatHint,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>, format: FormatHint) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hint_aliases() {
        assert_eq!("auto".parse::<FormatHint>().unwrap(), FormatHint::Auto);
        assert_eq!("".parse::<FormatHint>().unwrap(), FormatHint::Auto);
        assert_eq!(
            "domain_text".parse::<FormatHint>().unwrap(),
            FormatHint::Fixed(SourceFormat::DomainText)
        );
        assert_eq!(
            "IP_TEXT".parse::<FormatHint>().unwrap(),
            FormatHint::Fixed(SourceFormat::IpText)
        );
        assert_eq!(
            "singbox_json".parse::<FormatHint>().unwrap(),
            FormatHint::Fixed(SourceFormat::SingboxJson)
        );
        assert_eq!(
            " Clash ".parse::<FormatHint>().unwrap(),
            FormatHint::Fixed(SourceFormat::Clash)
        );
    }

    #[test]
    fn test_format_hint_unknown() {
        assert!("surge".parse::<FormatHint>().is_err());
    }

    #[test]
    fn test_rule_kind_clash_lookup() {
        assert_eq!(
            RuleKind::from_clash_type("domain-suffix"),
            Some(RuleKind::DomainSuffix)
        );
        assert_eq!(RuleKind::from_clash_type("IP-CIDR6"), Some(RuleKind::IpCidr6));
        assert_eq!(RuleKind::from_clash_type("GEOIP"), None);
        assert_eq!(RuleKind::from_clash_type("MATCH"), None);
    }

    #[test]
    fn test_rule_kind_field_lookup() {
        assert_eq!(
            RuleKind::from_field_name("domain_keyword"),
            Some(RuleKind::DomainKeyword)
        );
        assert_eq!(RuleKind::from_field_name("port"), None);
    }

    #[test]
    fn test_rule_kind_order_matches_all() {
        let mut sorted = RuleKind::ALL;
        sorted.sort();
        assert_eq!(sorted, RuleKind::ALL);
    }
}
