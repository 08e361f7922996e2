//! The L7 rule catalog (§4.11): a role → ordered HTTP rule list, with a
//! `%%index%%` placeholder substituted per access token at render time.
//!
//! Canonical rules are loaded from a cluster config map at startup and on
//! change (see `perikles::informer`); [`RuleCatalog::canonical`] supplies
//! the fallback set recovered from `perikles/architect/elastic_roles.go`
//! when no config map is present yet.

use std::collections::BTreeMap;

use perikles_k8s::HttpRule;

pub const INDEX_PLACEHOLDER: &str = "%%index%%";
pub const HEALTH_PATH: &str = "^/$";
pub const TRACING_SIDECAR_CONTAINER_NAME: &str = "aristoteles";

fn rule(method: &str, path: &str) -> HttpRule {
    HttpRule {
        method_regex: method.to_string(),
        path_regex: path.to_string(),
    }
}

fn health_rule() -> HttpRule {
    rule("GET", HEALTH_PATH)
}

fn seeder_rules() -> Vec<HttpRule> {
    vec![
        rule("DELETE", "^/%%index%%"),
        rule("PUT", "^/%%index%%"),
        rule("PUT", "^/_ilm/policy/%%index%%_policy$"),
        rule("PUT", "^/%%index%%/_create$"),
        rule("POST", "^/%%index%%/_bulk$"),
        rule("POST", r"^/%%index%%/_doc(\?.*)?$"),
    ]
}

fn search_scroll_rules() -> Vec<HttpRule> {
    vec![
        rule("POST", r"^/%%index%%/_search(\?.*)?$"),
        rule("POST", r"^/_search/scroll(\?.*)?$"),
    ]
}

fn hybrid_rules() -> Vec<HttpRule> {
    let mut rules = seeder_rules();
    rules.push(rule("GET", "^/%%index%%"));
    rules.extend(search_scroll_rules());
    rules
}

fn api_rules() -> Vec<HttpRule> {
    search_scroll_rules()
}

fn creator_rules() -> Vec<HttpRule> {
    vec![rule("PUT", r"^/%%index%%/_create/.*$")]
}

fn alias_rules() -> Vec<HttpRule> {
    vec![
        rule("DELETE", "^/%%index%%"),
        rule("PUT", "^/%%index%%"),
        rule("PUT", r"^/%%index%%(-\d{4}\.\d{2}\.\d{2})?$"),
        rule("POST", "^/_aliases$"),
        rule("PUT", "^/_ilm/policy/%%index%%_policy$"),
    ]
}

/// A role → ordered HTTP rule list, each rule still carrying the
/// `%%index%%` placeholder until [`RuleCatalog::rules_for`] renders it
/// against a concrete access token.
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    by_role: BTreeMap<String, Vec<HttpRule>>,
}

impl RuleCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The fallback catalog, used when the cluster config map is absent
    /// (L7 mode then degrades with a warning logged by the caller) or has
    /// not been observed yet.
    pub fn canonical() -> Self {
        let mut by_role = BTreeMap::new();
        by_role.insert("seeder".to_string(), with_health(seeder_rules()));
        by_role.insert("hybrid".to_string(), with_health(hybrid_rules()));
        by_role.insert("api".to_string(), with_health(api_rules()));
        by_role.insert("creator".to_string(), with_health(creator_rules()));
        by_role.insert("alias".to_string(), with_health(alias_rules()));
        Self { by_role }
    }

    /// Parses a catalog out of a config map's string data, one JSON array
    /// of `{method, path}` objects per role key.
    pub fn from_configmap_data(data: &BTreeMap<String, String>) -> Result<Self, serde_json::Error> {
        let mut by_role = BTreeMap::new();
        for (role, json) in data {
            let rules: Vec<RawRule> = serde_json::from_str(json)?;
            by_role.insert(
                role.clone(),
                with_health(
                    rules
                        .into_iter()
                        .map(|r| rule(&r.method, &r.path))
                        .collect(),
                ),
            );
        }
        Ok(Self { by_role })
    }

    pub fn is_empty(&self) -> bool {
        self.by_role.is_empty()
    }

    /// Renders the rule set for `role`, substituting `%%index%%` with
    /// `index` in every path regex. Returns `None` for an unknown role.
    pub fn rules_for(&self, role: &str, index: &str) -> Option<Vec<HttpRule>> {
        self.by_role.get(role).map(|rules| {
            rules
                .iter()
                .map(|r| HttpRule {
                    method_regex: r.method_regex.clone(),
                    path_regex: r.path_regex.replace(INDEX_PLACEHOLDER, index),
                })
                .collect()
        })
    }
}

fn with_health(mut rules: Vec<HttpRule>) -> Vec<HttpRule> {
    rules.push(health_rule());
    rules
}

#[derive(serde::Deserialize)]
struct RawRule {
    method: String,
    path: String,
}

/// Rules appended for a known tracing sidecar, targeting `alias` and its
/// date-sharded children.
pub fn tracing_sidecar_rules(alias: &str) -> Vec<HttpRule> {
    vec![
        rule("POST", &format!("^/{alias}/_doc(\\?.*)?$")),
        rule("PUT", &format!("^/{alias}(-\\d{{4}}\\.\\d{{2}}\\.\\d{{2}})?$")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_catalog_covers_all_roles_and_appends_health() {
        let catalog = RuleCatalog::canonical();
        for role in ["seeder", "hybrid", "api", "creator", "alias"] {
            let rules = catalog.rules_for(role, "herodotos").expect("role present");
            assert!(rules.iter().any(|r| r.path_regex == HEALTH_PATH));
        }
    }

    #[test]
    fn index_placeholder_is_substituted() {
        let catalog = RuleCatalog::canonical();
        let rules = catalog.rules_for("seeder", "herodotos").unwrap();
        assert!(rules.iter().any(|r| r.path_regex == "^/herodotos"));
        assert!(!rules.iter().any(|r| r.path_regex.contains(INDEX_PLACEHOLDER)));
    }

    #[test]
    fn unknown_role_returns_none() {
        let catalog = RuleCatalog::canonical();
        assert!(catalog.rules_for("nonexistent", "x").is_none());
    }
}
