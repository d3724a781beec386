use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::MainFrame => "main_frame",
            ResourceType::SubFrame => "sub_frame",
        }
    }
}

/// One declarative block rule. Derived from the blocklist on every resync and
/// never stored on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockRule {
    pub id: u32,
    pub domain: String,
    pub resource_types: Vec<ResourceType>,
}

impl BlockRule {
    pub fn new(id: u32, domain: impl Into<String>) -> Self {
        Self {
            id,
            domain: domain.into(),
            resource_types: vec![ResourceType::MainFrame, ResourceType::SubFrame],
        }
    }

    /// Adblock-style filter anchored at a label boundary.
    pub fn url_filter(&self) -> String {
        format!("||{}^", self.domain)
    }

    /// True when `host` is the rule's domain or one of its subdomains.
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        match host.strip_suffix(self.domain.as_str()) {
            Some("") => true,
            Some(prefix) => prefix.ends_with('.'),
            None => false,
        }
    }

    pub fn applies_to(&self, resource: ResourceType) -> bool {
        self.resource_types.contains(&resource)
    }
}

/// Compile canonical domains into block rules with ids `1..=n` in input order.
/// Duplicate domains keep their first position.
pub fn compile_rules<S: AsRef<str>>(domains: &[S]) -> Vec<BlockRule> {
    let mut rules: Vec<BlockRule> = Vec::with_capacity(domains.len());
    for domain in domains {
        let domain = domain.as_ref();
        if domain.is_empty() || rules.iter().any(|rule| rule.domain == domain) {
            continue;
        }
        let id = rules.len() as u32 + 1;
        rules.push(BlockRule::new(id, domain));
    }
    rules
}
