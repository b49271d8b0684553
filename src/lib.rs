//! Ruleset Forge - normalize remote routing rule lists into compiled rule-sets
//!
//! This library turns third-party rule lists into binary rule-set artifacts
//! for two proxy engines:
//! - Format detection (clash, domain-text, ip-text, singbox-json)
//! - Extraction into a deduplicated, typed rule bucket
//! - sing-box `.srs` and mihomo `.mrs` source emission
//! - Strict, atomic compiler invocation with timeouts
//! - Orphan cleanup of artifacts no longer in the manifest
//!
//! # Example
//!
//! ```rust
//! use ruleset_forge::{detect, extract, RuleKind, SourceFormat, FormatHint};
//!
//! let text = "
//! payload:
//!   - DOMAIN-SUFFIX,google.com
//!   - IP-CIDR,1.1.1.0/24,no-resolve
//! ";
//!
//! let format = detect(FormatHint::Auto, text);
//! assert_eq!(format, SourceFormat::Clash);
//!
//! let bucket = extract(format, text);
//! assert!(bucket.contains(RuleKind::DomainSuffix, "google.com"));
//! assert!(bucket.contains(RuleKind::IpCidr, "1.1.1.0/24"));
//! ```
//!
//! # Source Formats
//!
//! | Format | Example | Description |
//! |--------|---------|-------------|
//! | clash | `DOMAIN-SUFFIX,google.com` | `TYPE,VALUE[,...]` lines or a `payload:` list |
//! | domain-text | `google.com` | One domain per line, matched as a suffix |
//! | ip-text | `1.1.1.0/24` | One CIDR per line |
//! | singbox-json | `{"version":3,"rules":[...]}` | sing-box rule-set source |
//!
//! ## Artifacts
//!
//! For a source named `ads`:
//!
//! - `ads.srs` - sing-box rule-set with every extracted kind
//! - `ads_domain.mrs` - mihomo domain rule-set (exact domains and suffixes)
//! - `ads_ipcidr.mrs` - mihomo ipcidr rule-set (IPv4 and IPv6 CIDRs)
//!
//! An artifact exists only when its rules were rebuilt successfully in the
//! latest run.

pub mod bucket;
pub mod compiler;
pub mod emit;
pub mod error;
pub mod fetch;
pub mod format;
pub mod manifest;
pub mod parser;
pub mod pipeline;
pub mod types;

// Re-export commonly used items
pub use bucket::{parse_cidr, RuleBucket, RuleEntry};
pub use error::{CompileErrorKind, ForgeError, Result};
pub use format::{detect, detect_document};
pub use parser::{extract, extract_document, Document, RuleSetSource};
pub use types::{FormatHint, RuleKind, SourceDescriptor, SourceFormat};

// Re-export emitter types
pub use emit::{Behavior, HeadlessRule, RuleSetDocument, Target, DEFAULT_RULESET_VERSION};

// Re-export compiler types
pub use compiler::{
    compile_atomic, locate_binary, CompileOptions, MihomoConverter, RuleCompiler,
    SingBoxCompiler, DEFAULT_COMPILE_TIMEOUT,
};

// Re-export fetch and manifest types
pub use fetch::{HttpFetcher, MemoryFetcher, SourceFetcher, DEFAULT_FETCH_TIMEOUT};
pub use manifest::{load_manifest, parse_manifest};

// Re-export pipeline types
pub use pipeline::{
    BuildResult, Pipeline, PipelineOptions, RunSummary, SourceOutcome, TargetOutcome,
    TargetStatus,
};
