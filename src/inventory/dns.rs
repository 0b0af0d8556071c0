//! DNS records published for a deployment.

use std::collections::HashSet;

use crate::config::DnsConfig;
use crate::planner::DnsManager;
use crate::state::{DeploymentSnapshot, DnsRecord};

/// DNS manager over the records stored in a snapshot.
#[derive(Debug, Clone, Default)]
pub struct DnsRecordStore {
    enabled: bool,
    domain: String,
    records: HashSet<DnsRecord>,
}

impl DnsRecordStore {
    /// Creates a store from DNS settings and published records.
    #[must_use]
    pub fn new(config: &DnsConfig, records: impl IntoIterator<Item = DnsRecord>) -> Self {
        Self {
            enabled: config.enabled,
            domain: config.domain.clone(),
            records: records.into_iter().collect(),
        }
    }

    /// Creates a store from the records of a snapshot.
    #[must_use]
    pub fn from_snapshot(config: &DnsConfig, snapshot: &DeploymentSnapshot) -> Self {
        Self::new(config, snapshot.dns_records.iter().cloned())
    }

    /// Number of published records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl DnsManager for DnsRecordStore {
    fn dns_enabled(&self) -> bool {
        self.enabled
    }

    fn dns_domain_name(&self) -> &str {
        &self.domain
    }

    fn find_dns_record(&self, name: &str, ip: &str) -> Option<DnsRecord> {
        let wanted = DnsRecord {
            name: name.to_string(),
            ip: ip.to_string(),
        };
        self.records.get(&wanted).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, ip: &str) -> DnsRecord {
        DnsRecord {
            name: name.to_string(),
            ip: ip.to_string(),
        }
    }

    #[test]
    fn test_find_requires_name_and_address() {
        let config = DnsConfig {
            enabled: true,
            domain: String::from("bosh"),
        };
        let store = DnsRecordStore::new(&config, [record("0.web.private.simple.bosh", "10.0.0.2")]);

        assert!(store.dns_enabled());
        assert_eq!(store.dns_domain_name(), "bosh");
        assert!(store.find_dns_record("0.web.private.simple.bosh", "10.0.0.2").is_some());
        assert!(store.find_dns_record("0.web.private.simple.bosh", "10.0.0.3").is_none());
    }

    #[test]
    fn test_from_snapshot_dedups_records() {
        let mut snapshot = DeploymentSnapshot::new("simple");
        snapshot.dns_records = vec![record("a.bosh", "1.1.1.1"), record("a.bosh", "1.1.1.1")];

        let store = DnsRecordStore::from_snapshot(&DnsConfig::default(), &snapshot);
        assert_eq!(store.len(), 1);
        assert!(!store.dns_enabled());
    }
}
