//! Hosts-file backend for the network filter.
//!
//! Rules live in a managed section of a hosts-format file:
//!
//! ```text
//! # >>> focuskit >>>
//! # rule 1 ||x.com^
//! 0.0.0.0 x.com
//! 0.0.0.0 www.x.com
//! # <<< focuskit <<<
//! ```
//!
//! Lines outside the section are preserved untouched. A hosts file cannot
//! express wildcards, so only the bare domain and its `www.` alias are
//! redirected.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{anyhow, Context, Result};

use super::{enforcer::NetworkFilter, rules::BlockRule};

const SECTION_START: &str = "# >>> focuskit >>>";
const SECTION_END: &str = "# <<< focuskit <<<";
const RULE_PREFIX: &str = "# rule ";
const SINKHOLE: &str = "0.0.0.0";

pub struct HostsFileFilter {
    path: PathBuf,
    // Serializes read-modify-write of the file within this process.
    lock: Mutex<()>,
}

struct HostsFile {
    before: Vec<String>,
    rules: BTreeMap<u32, String>,
    after: Vec<String>,
}

impl HostsFileFilter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<HostsFile> {
        if !self.path.exists() {
            return Ok(HostsFile {
                before: Vec::new(),
                rules: BTreeMap::new(),
                after: Vec::new(),
            });
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read hosts file {}", self.path.display()))?;
        parse_hosts(&contents)
    }

    fn write(&self, file: &HostsFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create hosts directory {}", parent.display())
            })?;
        }
        fs::write(&self.path, render_hosts(file))
            .with_context(|| format!("failed to write hosts file {}", self.path.display()))
    }
}

impl NetworkFilter for HostsFileFilter {
    fn installed_rule_ids(&self) -> Result<Vec<u32>> {
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(self.read()?.rules.keys().copied().collect())
    }

    fn update_rules(&self, remove_ids: &[u32], add_rules: &[BlockRule]) -> Result<()> {
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut file = self.read()?;
        for id in remove_ids {
            file.rules.remove(id);
        }
        for rule in add_rules {
            if file.rules.contains_key(&rule.id) {
                return Err(anyhow!("rule id {} is already installed", rule.id));
            }
            file.rules.insert(rule.id, rule.domain.clone());
        }
        self.write(&file)
    }
}

fn parse_hosts(contents: &str) -> Result<HostsFile> {
    let mut before = Vec::new();
    let mut after = Vec::new();
    let mut rules = BTreeMap::new();
    let mut in_section = false;
    let mut seen_section = false;

    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed == SECTION_START {
            in_section = true;
            seen_section = true;
            continue;
        }
        if trimmed == SECTION_END {
            in_section = false;
            continue;
        }
        if in_section {
            if let Some(rest) = trimmed.strip_prefix(RULE_PREFIX) {
                let (id, filter) = rest
                    .split_once(' ')
                    .ok_or_else(|| anyhow!("malformed rule line '{trimmed}'"))?;
                let id: u32 = id
                    .parse()
                    .with_context(|| format!("malformed rule id in '{trimmed}'"))?;
                let domain = filter
                    .trim()
                    .trim_start_matches("||")
                    .trim_end_matches('^')
                    .to_string();
                rules.insert(id, domain);
            }
        } else if seen_section {
            after.push(line.to_string());
        } else {
            before.push(line.to_string());
        }
    }

    Ok(HostsFile {
        before,
        rules,
        after,
    })
}

fn render_hosts(file: &HostsFile) -> String {
    let mut out = String::new();
    for line in &file.before {
        out.push_str(line);
        out.push('\n');
    }
    if !file.rules.is_empty() {
        out.push_str(SECTION_START);
        out.push('\n');
        for (id, domain) in &file.rules {
            out.push_str(&format!("{RULE_PREFIX}{id} ||{domain}^\n"));
            out.push_str(&format!("{SINKHOLE} {domain}\n"));
            out.push_str(&format!("{SINKHOLE} www.{domain}\n"));
        }
        out.push_str(SECTION_END);
        out.push('\n');
    }
    for line in &file.after {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::rules::compile_rules;

    #[test]
    fn install_and_remove_keep_foreign_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "127.0.0.1 localhost\n").unwrap();
        let filter = HostsFileFilter::new(path.clone());

        filter
            .update_rules(&[], &compile_rules(&["x.com", "y.org"]))
            .unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("127.0.0.1 localhost\n"));
        assert!(contents.contains("0.0.0.0 x.com\n"));
        assert!(contents.contains("0.0.0.0 www.y.org\n"));
        assert_eq!(filter.installed_rule_ids().unwrap(), vec![1, 2]);

        filter.update_rules(&[1, 2], &[]).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "127.0.0.1 localhost\n");
        assert!(filter.installed_rule_ids().unwrap().is_empty());
    }

    #[test]
    fn missing_file_has_no_rules() {
        let dir = tempfile::tempdir().unwrap();
        let filter = HostsFileFilter::new(dir.path().join("absent"));
        assert!(filter.installed_rule_ids().unwrap().is_empty());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let filter = HostsFileFilter::new(dir.path().join("hosts"));
        let rules = compile_rules(&["x.com"]);
        filter.update_rules(&[], &rules).unwrap();
        assert!(filter.update_rules(&[], &rules).is_err());
    }

    #[test]
    fn parses_rules_written_by_render() {
        let file = HostsFile {
            before: vec!["# system".into()],
            rules: BTreeMap::from([(4, "a.io".to_string())]),
            after: vec!["::1 localhost".into()],
        };
        let parsed = parse_hosts(&render_hosts(&file)).unwrap();
        assert_eq!(parsed.rules.get(&4).map(String::as_str), Some("a.io"));
        assert_eq!(parsed.before, vec!["# system"]);
        assert_eq!(parsed.after, vec!["::1 localhost"]);
    }
}
