//! Engine source emitters.
//!
//! Each compile target turns a [`RuleBucket`] into the source format its
//! compiler reads. A target only produces an artifact when the bucket holds
//! at least one of the kinds it covers.

pub mod mihomo;
pub mod singbox;

use std::fmt;

use crate::bucket::RuleBucket;
use crate::error::Result;
use crate::types::RuleKind;

pub use mihomo::Behavior;
pub use singbox::{HeadlessRule, RuleSetDocument, DEFAULT_RULESET_VERSION};

/// A compiled artifact produced per source name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// sing-box binary rule-set (`{name}.srs`)
    SingBox,
    /// mihomo domain-behavior rule-set (`{name}_domain.mrs`)
    MihomoDomain,
    /// mihomo ipcidr-behavior rule-set (`{name}_ipcidr.mrs`)
    MihomoIpCidr,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::SingBox, Target::MihomoDomain, Target::MihomoIpCidr];

    /// Rule kinds this target serializes
    pub fn kinds(&self) -> &'static [RuleKind] {
        match self {
            Target::SingBox => &singbox::EMITTED_KINDS,
            Target::MihomoDomain => Behavior::Domain.kinds(),
            Target::MihomoIpCidr => Behavior::IpCidr.kinds(),
        }
    }

    /// Whether the bucket holds anything for this target
    pub fn has_content(&self, bucket: &RuleBucket) -> bool {
        bucket.has_any(self.kinds())
    }

    /// Compiled artifact file name for a source
    pub fn artifact_file_name(&self, name: &str) -> String {
        match self {
            Target::SingBox => format!("{}.srs", name),
            Target::MihomoDomain => format!("{}_domain.mrs", name),
            Target::MihomoIpCidr => format!("{}_ipcidr.mrs", name),
        }
    }

    /// Emitted source file name for a source
    pub fn source_file_name(&self, name: &str) -> String {
        match self {
            Target::SingBox => format!("{}.json", name),
            Target::MihomoDomain => format!("{}_domain.yaml", name),
            Target::MihomoIpCidr => format!("{}_ipcidr.yaml", name),
        }
    }

    /// Render the engine source text for this target.
    pub fn render(&self, bucket: &RuleBucket, ruleset_version: u32) -> Result<String> {
        match self {
            Target::SingBox => singbox::render(bucket, ruleset_version),
            Target::MihomoDomain => mihomo::render(bucket, Behavior::Domain),
            Target::MihomoIpCidr => mihomo::render(bucket, Behavior::IpCidr),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::SingBox => f.write_str("srs"),
            Target::MihomoDomain => f.write_str("mrs-domain"),
            Target::MihomoIpCidr => f.write_str("mrs-ipcidr"),
        }
    }
}
