//! End-to-end pipeline tests with in-memory sources and shell-script compilers.

#![cfg(unix)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use ruleset_forge::{
    FormatHint, MemoryFetcher, Pipeline, PipelineOptions, RuleCompiler, RunSummary,
    SourceDescriptor, SourceFormat, SourceOutcome, Target, TargetStatus,
};

/// Compiler backed by a shell snippet; `$1` is the source, `$2` the output
struct ShellCompiler(&'static str);

impl RuleCompiler for ShellCompiler {
    fn name(&self) -> &str {
        "sh"
    }

    fn command(&self, source: &Path, output: &Path) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(self.0).arg("sh").arg(source).arg(output);
        cmd
    }
}

/// Copies the emitted source to the output, so artifacts are inspectable text
const COPY: &str = r#"cp "$1" "$2""#;

struct Workspace {
    root: PathBuf,
}

impl Workspace {
    fn new(name: &str) -> Self {
        let root = env::temp_dir().join(format!("ruleset_forge_pipeline_{}", name));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    fn options(&self) -> PipelineOptions {
        PipelineOptions::new()
            .with_singbox_dir(self.root.join("singbox"))
            .with_mihomo_dir(self.root.join("mihomo"))
            .with_work_dir(self.root.join("work"))
    }

    fn singbox(&self, file: &str) -> PathBuf {
        self.root.join("singbox").join(file)
    }

    fn mihomo(&self, file: &str) -> PathBuf {
        self.root.join("mihomo").join(file)
    }

    fn pipeline(&self, fetcher: MemoryFetcher, script: &'static str) -> Pipeline {
        self.pipeline_with(fetcher, script, self.options())
    }

    fn pipeline_with(
        &self,
        fetcher: MemoryFetcher,
        script: &'static str,
        options: PipelineOptions,
    ) -> Pipeline {
        Pipeline::new(Box::new(fetcher), options)
            .with_compiler(Target::SingBox, Box::new(ShellCompiler(script)))
            .with_compiler(Target::MihomoDomain, Box::new(ShellCompiler(script)))
            .with_compiler(Target::MihomoIpCidr, Box::new(ShellCompiler(script)))
    }

    fn seed(&self, path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "previous build").unwrap();
    }

    /// Every file under the workspace, relative path -> bytes
    fn snapshot(&self) -> Vec<(PathBuf, Vec<u8>)> {
        let mut files = Vec::new();
        for sub in ["singbox", "mihomo", "work"] {
            let dir = self.root.join(sub);
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let rel = path.strip_prefix(&self.root).unwrap().to_path_buf();
                files.push((rel, fs::read(&path).unwrap()));
            }
        }
        files.sort();
        files
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn source(name: &str) -> SourceDescriptor {
    SourceDescriptor::new(name, format!("mem://{}", name), FormatHint::Auto)
}

const CLASH_MIXED: &str = "payload:
  - DOMAIN-SUFFIX,example.com,PROXY
  - DOMAIN,exact.example.org
  - DOMAIN-KEYWORD,tracker
  - IP-CIDR,10.0.0.0/8,no-resolve
  - IP-CIDR6,2001:db8::/32
  - UNKNOWN-TYPE,foo
";

const IP_TEXT: &str = "1.1.1.0/24\n8.8.8.0/24\n9.9.9.0/24\n";

const DOMAIN_TEXT: &str = "# ad hosts\nads.example.com\n.tracker.net\nmetrics.example.io\n";

fn fetcher(entries: &[(&str, &str)]) -> MemoryFetcher {
    let mut fetcher = MemoryFetcher::new();
    for (name, body) in entries {
        fetcher.add(format!("mem://{}", name), *body);
    }
    fetcher
}

fn json_file(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn yaml_payload(path: &Path) -> Vec<String> {
    let value: serde_yaml::Value = serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    value["payload"]
        .as_sequence()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

fn has_tmp_files(ws: &Workspace) -> bool {
    ws.snapshot()
        .iter()
        .any(|(path, _)| path.to_string_lossy().ends_with(".tmp"))
}

#[test]
fn test_clash_scenario_artifacts() {
    let ws = Workspace::new("clash_scenario");
    let pipeline = ws.pipeline(fetcher(&[("mixed", CLASH_MIXED)]), COPY);

    let summary = pipeline.run(&[source("mixed")]).unwrap();
    assert_eq!(summary.succeeded, 1);

    let result = &summary.results[0];
    assert_eq!(result.format, Some(SourceFormat::Clash));
    assert_eq!(result.counts.values().sum::<usize>(), 5);

    let srs = json_file(&ws.singbox("mixed.srs"));
    assert_eq!(srs["version"], 3);
    let rule = &srs["rules"][0];
    assert_eq!(rule["type"], "default");
    assert_eq!(rule["domain_suffix"], serde_json::json!(["example.com"]));
    assert_eq!(rule["domain_keyword"], serde_json::json!(["tracker"]));
    assert_eq!(rule["ip_cidr"], serde_json::json!(["10.0.0.0/8", "2001:db8::/32"]));
    assert!(rule.get("ip_cidr6").is_none());

    assert_eq!(
        yaml_payload(&ws.mihomo("mixed_domain.mrs")),
        vec!["+.example.com", "exact.example.org"]
    );
    assert_eq!(
        yaml_payload(&ws.mihomo("mixed_ipcidr.mrs")),
        vec!["10.0.0.0/8", "2001:db8::/32"]
    );
}

#[test]
fn test_ip_text_scenario() {
    let ws = Workspace::new("ip_text");
    let pipeline = ws.pipeline(fetcher(&[("cn", IP_TEXT)]), COPY);

    let summary = pipeline.run(&[source("cn")]).unwrap();
    let result = &summary.results[0];
    assert_eq!(result.format, Some(SourceFormat::IpText));
    assert_eq!(result.target(Target::MihomoDomain), Some(&TargetStatus::NoRules));
    assert!(matches!(
        result.target(Target::MihomoIpCidr),
        Some(TargetStatus::Built { .. })
    ));

    assert_eq!(
        yaml_payload(&ws.mihomo("cn_ipcidr.mrs")),
        vec!["1.1.1.0/24", "8.8.8.0/24", "9.9.9.0/24"]
    );
    assert!(!ws.mihomo("cn_domain.mrs").exists());
}

#[test]
fn test_target_without_rules_removes_previous_artifact() {
    let ws = Workspace::new("target_no_rules");
    ws.seed(&ws.mihomo("cn_domain.mrs"));

    let pipeline = ws.pipeline(fetcher(&[("cn", IP_TEXT)]), COPY);
    pipeline.run(&[source("cn")]).unwrap();

    assert!(!ws.mihomo("cn_domain.mrs").exists());
    assert!(ws.mihomo("cn_ipcidr.mrs").exists());
}

#[test]
fn test_idempotent_runs() {
    let ws = Workspace::new("idempotent");
    let entries = [("mixed", CLASH_MIXED), ("cn", IP_TEXT), ("ads", DOMAIN_TEXT)];
    let sources = [source("mixed"), source("cn"), source("ads")];

    ws.pipeline(fetcher(&entries), COPY).run(&sources).unwrap();
    let first = ws.snapshot();

    let summary = ws.pipeline(fetcher(&entries), COPY).run(&sources).unwrap();
    let second = ws.snapshot();

    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.orphans_removed, 0);
    assert!(!first.is_empty());
    assert_eq!(first, second);
    assert!(!has_tmp_files(&ws));
}

#[test]
fn test_emitted_sources_removed_unless_kept() {
    let ws = Workspace::new("keep_sources");

    ws.pipeline(fetcher(&[("cn", IP_TEXT)]), COPY)
        .run(&[source("cn")])
        .unwrap();
    assert_eq!(fs::read_dir(ws.root.join("work")).unwrap().count(), 0);

    let options = ws.options().with_keep_sources(true);
    ws.pipeline_with(fetcher(&[("cn", IP_TEXT)]), COPY, options)
        .run(&[source("cn")])
        .unwrap();
    assert!(ws.root.join("work").join("cn.json").exists());
    assert!(ws.root.join("work").join("cn_ipcidr.yaml").exists());
    assert!(!ws.root.join("work").join("cn_domain.yaml").exists());
}

#[test]
fn test_removed_sources_are_cleaned_up() {
    let ws = Workspace::new("orphans");
    let entries = [("cn", IP_TEXT), ("ads", DOMAIN_TEXT)];

    ws.pipeline(fetcher(&entries), COPY)
        .run(&[source("cn"), source("ads")])
        .unwrap();
    assert!(ws.singbox("ads.srs").exists());
    assert!(ws.mihomo("ads_domain.mrs").exists());

    // Leftovers from an interrupted run and unrelated files
    fs::write(ws.singbox("old.srs.tmp"), "partial").unwrap();
    fs::write(ws.singbox("README.md"), "notes").unwrap();

    let summary = ws
        .pipeline(fetcher(&entries), COPY)
        .run(&[source("cn")])
        .unwrap();

    assert_eq!(summary.orphans_removed, 3);
    assert!(!ws.singbox("ads.srs").exists());
    assert!(!ws.mihomo("ads_domain.mrs").exists());
    assert!(!ws.singbox("old.srs.tmp").exists());
    assert!(ws.singbox("README.md").exists());
    assert!(ws.singbox("cn.srs").exists());
    assert!(ws.mihomo("cn_ipcidr.mrs").exists());
}

#[test]
fn test_empty_payload_removes_artifacts() {
    let ws = Workspace::new("empty_payload");
    ws.seed(&ws.singbox("ads.srs"));
    ws.seed(&ws.mihomo("ads_domain.mrs"));
    ws.seed(&ws.mihomo("ads_ipcidr.mrs"));

    let summary = ws
        .pipeline(fetcher(&[("ads", "payload: []\n")]), COPY)
        .run(&[source("ads")])
        .unwrap();

    assert_eq!(summary.emptied, 1);
    assert_eq!(summary.results[0].outcome, SourceOutcome::Empty);
    assert!(!ws.singbox("ads.srs").exists());
    assert!(!ws.mihomo("ads_domain.mrs").exists());
    assert!(!ws.mihomo("ads_ipcidr.mrs").exists());
}

#[test]
fn test_malformed_source_counts_as_empty() {
    let ws = Workspace::new("malformed");
    ws.seed(&ws.singbox("bad.srs"));

    let summary = ws
        .pipeline(fetcher(&[("bad", "{\"rules\": [unterminated")]), COPY)
        .run(&[source("bad")])
        .unwrap();

    assert_eq!(summary.emptied, 1);
    assert!(!ws.singbox("bad.srs").exists());
}

#[test]
fn test_zero_byte_output_removes_previous_artifact() {
    let ws = Workspace::new("zero_byte");
    ws.seed(&ws.singbox("cn.srs"));
    ws.seed(&ws.mihomo("cn_ipcidr.mrs"));

    let summary = ws
        .pipeline(fetcher(&[("cn", IP_TEXT)]), r#": > "$2""#)
        .run(&[source("cn")])
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert!(matches!(
        summary.results[0].target(Target::SingBox),
        Some(TargetStatus::Failed { .. })
    ));
    assert!(!ws.singbox("cn.srs").exists());
    assert!(!ws.mihomo("cn_ipcidr.mrs").exists());
    assert!(!has_tmp_files(&ws));
}

#[test]
fn test_failed_target_does_not_block_others() {
    let ws = Workspace::new("partial_failure");
    let script = r#"case "$2" in *.mrs.tmp) exit 1 ;; esac; cp "$1" "$2""#;

    let summary = ws
        .pipeline(fetcher(&[("mixed", CLASH_MIXED)]), script)
        .run(&[source("mixed")])
        .unwrap();

    let result = &summary.results[0];
    assert!(!result.is_success());
    assert!(matches!(
        result.target(Target::SingBox),
        Some(TargetStatus::Built { .. })
    ));
    assert!(ws.singbox("mixed.srs").exists());
    assert!(!ws.mihomo("mixed_domain.mrs").exists());
    assert!(!ws.mihomo("mixed_ipcidr.mrs").exists());
}

#[test]
fn test_fetch_failure_isolated_and_cleaned() {
    let ws = Workspace::new("fetch_failure");
    let sources = [source("cn"), source("ads")];

    ws.pipeline(fetcher(&[("cn", IP_TEXT), ("ads", DOMAIN_TEXT)]), COPY)
        .run(&sources)
        .unwrap();
    assert!(ws.singbox("ads.srs").exists());

    // `ads` is now unreachable
    let summary: RunSummary = ws
        .pipeline(fetcher(&[("cn", IP_TEXT)]), COPY)
        .run(&sources)
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(matches!(
        summary.results[1].outcome,
        SourceOutcome::FetchFailed { .. }
    ));
    assert!(!ws.singbox("ads.srs").exists());
    assert!(!ws.mihomo("ads_domain.mrs").exists());
    assert!(ws.singbox("cn.srs").exists());
}

#[test]
fn test_non_strict_keeps_previous_artifacts() {
    let ws = Workspace::new("non_strict");
    ws.seed(&ws.singbox("ads.srs"));
    ws.seed(&ws.singbox("cn.srs"));

    let options = ws.options().with_strict(false);
    let summary = ws
        .pipeline_with(
            fetcher(&[("cn", IP_TEXT), ("ads", "payload: []\n")]),
            "exit 1",
            options,
        )
        .run(&[source("cn"), source("ads")])
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.emptied, 1);
    assert_eq!(fs::read_to_string(ws.singbox("ads.srs")).unwrap(), "previous build");
    assert_eq!(fs::read_to_string(ws.singbox("cn.srs")).unwrap(), "previous build");
}

#[test]
fn test_explicit_hint_overrides_detection() {
    let ws = Workspace::new("hint");
    // Would auto-detect as ip-text; the hint forces domain-text, which keeps nothing
    let descriptor = SourceDescriptor::new(
        "forced",
        "mem://forced",
        FormatHint::Fixed(SourceFormat::DomainText),
    );

    let summary = ws
        .pipeline(fetcher(&[("forced", IP_TEXT)]), COPY)
        .run(&[descriptor])
        .unwrap();

    assert_eq!(summary.results[0].format, Some(SourceFormat::DomainText));
    assert_eq!(summary.emptied, 1);
}

#[test]
fn test_singbox_source_passthrough() {
    let ws = Workspace::new("singbox_json");
    let body = r#"{
        "version": 2,
        "rules": [
            {"domain_suffix": ".Example.com", "process_name": ["curl"]},
            {"type": "logical", "mode": "and", "rules": []},
            {"ip_cidr": ["192.168.0.0/16", "999.1.1.1/33"]}
        ]
    }"#;

    let summary = ws
        .pipeline(fetcher(&[("sb", body)]), COPY)
        .run(&[source("sb")])
        .unwrap();

    assert_eq!(summary.results[0].format, Some(SourceFormat::SingboxJson));
    let srs = json_file(&ws.singbox("sb.srs"));
    let rule = &srs["rules"][0];
    assert_eq!(rule["domain_suffix"], serde_json::json!(["example.com"]));
    assert_eq!(rule["process_name"], serde_json::json!(["curl"]));
    assert_eq!(rule["ip_cidr"], serde_json::json!(["192.168.0.0/16"]));
}
