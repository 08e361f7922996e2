//! Parsed view over a workload's pod-template annotations.

use std::collections::BTreeMap;

pub const HOSTNAME: &str = "perikles/hostname";
pub const VALIDITY: &str = "perikles/validity";
pub const HOSTSECRET: &str = "perikles/hostsecret";
pub const ACCESSES: &str = "perikles/accesses";
pub const UPDATED: &str = "perikles/updated";
pub const ROLE: &str = "odysseia-greek/role";
pub const ACCESS: &str = "odysseia-greek/access";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadAnnotations {
    pub hostname: Option<String>,
    pub validity_days: Option<i64>,
    pub host_secret: Option<String>,
    pub accesses: Vec<String>,
    pub role: Option<String>,
    pub access: Vec<String>,
}

fn split_semicolons(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl WorkloadAnnotations {
    pub fn from_map(annotations: &BTreeMap<String, String>) -> Self {
        Self {
            hostname: annotations.get(HOSTNAME).cloned(),
            validity_days: annotations.get(VALIDITY).and_then(|v| v.parse().ok()),
            host_secret: annotations.get(HOSTSECRET).cloned(),
            accesses: annotations
                .get(ACCESSES)
                .map(|v| split_semicolons(v))
                .unwrap_or_default(),
            role: annotations.get(ROLE).cloned(),
            access: annotations
                .get(ACCESS)
                .map(|v| split_semicolons(v))
                .unwrap_or_default(),
        }
    }

    pub fn is_tls_host(&self) -> bool {
        self.hostname.is_some()
    }

    pub fn has_db_access(&self) -> bool {
        self.role.is_some() && !self.access.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_accesses_produces_no_edges() {
        let annotations = WorkloadAnnotations::from_map(&map(&[(ACCESSES, "")]));
        assert!(annotations.accesses.is_empty());
    }

    #[test]
    fn accesses_split_on_semicolon_and_trimmed() {
        let annotations = WorkloadAnnotations::from_map(&map(&[(ACCESSES, "perikles; plato")]));
        assert_eq!(annotations.accesses, vec!["perikles", "plato"]);
    }

    #[test]
    fn validity_parses_as_integer_days() {
        let annotations = WorkloadAnnotations::from_map(&map(&[(HOSTNAME, "perikles"), (VALIDITY, "10")]));
        assert_eq!(annotations.validity_days, Some(10));
        assert!(annotations.is_tls_host());
    }

    #[test]
    fn missing_role_or_access_means_no_db_access() {
        let annotations = WorkloadAnnotations::from_map(&map(&[(ROLE, "seeder")]));
        assert!(!annotations.has_db_access());
    }
}
