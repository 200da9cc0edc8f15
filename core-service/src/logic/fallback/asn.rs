//! ASN fallback
//!
//! Resolves an address to its autonomous-system organization with a
//! longest-prefix match, then maps the organization to a coarse category.

use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use super::{AsnResolver, FallbackError};
use crate::logic::features::TrafficLabel;

// ============================================================================
// PREFIX TABLE
// ============================================================================

/// Organization announcing a prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsnRecord {
    pub asn: u32,
    pub org: String,
}

/// One row of the prefix table file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsnPrefix {
    pub network: IpNetwork,
    pub asn: u32,
    pub org: String,
}

/// CIDR → AS organization table
#[derive(Debug, Clone, Default)]
pub struct AsnTable {
    /// Sorted by prefix length, most specific first
    prefixes: Vec<AsnPrefix>,
}

impl AsnTable {
    pub fn new(mut prefixes: Vec<AsnPrefix>) -> Self {
        prefixes.sort_by(|a, b| b.network.prefix().cmp(&a.network.prefix()));
        Self { prefixes }
    }

    /// Load a JSON array of `{ "network", "asn", "org" }` rows
    pub fn from_file(path: &Path) -> Result<Self, FallbackError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FallbackError::Table(format!("{}: {}", path.display(), e)))?;
        let prefixes: Vec<AsnPrefix> = serde_json::from_str(&raw)
            .map_err(|e| FallbackError::Table(format!("{}: {}", path.display(), e)))?;

        log::info!("Loaded {} ASN prefixes from {}", prefixes.len(), path.display());
        Ok(Self::new(prefixes))
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Most specific prefix containing `ip`
    pub fn longest_match(&self, ip: IpAddr) -> Option<AsnRecord> {
        self.prefixes
            .iter()
            .find(|p| p.network.contains(ip))
            .map(|p| AsnRecord {
                asn: p.asn,
                org: p.org.clone(),
            })
    }
}

#[async_trait]
impl AsnResolver for AsnTable {
    async fn lookup(&self, ip: IpAddr) -> Option<AsnRecord> {
        self.longest_match(ip)
    }
}

// ============================================================================
// ORGANIZATION CATEGORIES
// ============================================================================

/// Organization keyword → category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgRule {
    pub keyword: String,
    pub label: TrafficLabel,
}

const DEFAULT_ORG_RULES: &[(&str, TrafficLabel)] = &[
    ("NETFLIX", TrafficLabel::Streaming),
    ("GOOGLE", TrafficLabel::Streaming),
    ("TWITCH", TrafficLabel::Streaming),
    ("VALVE", TrafficLabel::Gaming),
    ("RIOT", TrafficLabel::Gaming),
    ("BLIZZARD", TrafficLabel::Gaming),
    ("EPIC GAMES", TrafficLabel::Gaming),
    ("SONY INTERACTIVE", TrafficLabel::Gaming),
    ("ZOOM", TrafficLabel::VideoConference),
    ("MICROSOFT", TrafficLabel::VideoConference),
    ("CISCO WEBEX", TrafficLabel::VideoConference),
    ("FACEBOOK", TrafficLabel::Chat),
    ("META", TrafficLabel::Chat),
    ("TELEGRAM", TrafficLabel::Chat),
    ("DISCORD", TrafficLabel::Chat),
    ("DROPBOX", TrafficLabel::FileTransfer),
    ("AKAMAI", TrafficLabel::Browsing),
    ("CLOUDFLARE", TrafficLabel::Browsing),
    ("AMAZON", TrafficLabel::Browsing),
];

/// First matching keyword wins, so list specific organizations first
#[derive(Debug, Clone)]
pub struct OrgCategoryMap {
    rules: Vec<OrgRule>,
}

impl OrgCategoryMap {
    pub fn new(rules: Vec<OrgRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| OrgRule {
                keyword: r.keyword.trim().to_ascii_uppercase(),
                label: r.label,
            })
            .filter(|r| !r.keyword.is_empty())
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[OrgRule] {
        &self.rules
    }

    pub fn categorize(&self, org: &str) -> Option<TrafficLabel> {
        let org = org.to_ascii_uppercase();
        self.rules
            .iter()
            .find(|r| org.contains(&r.keyword))
            .map(|r| r.label)
    }
}

impl Default for OrgCategoryMap {
    fn default() -> Self {
        Self::new(
            DEFAULT_ORG_RULES
                .iter()
                .map(|(keyword, label)| OrgRule {
                    keyword: keyword.to_string(),
                    label: *label,
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn prefix(network: &str, asn: u32, org: &str) -> AsnPrefix {
        AsnPrefix {
            network: network.parse().unwrap(),
            asn,
            org: org.to_string(),
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = AsnTable::new(vec![
            prefix("198.51.0.0/16", 64500, "Wide Transit"),
            prefix("198.51.100.0/24", 2906, "NETFLIX STREAMING"),
        ]);

        let inner = table.longest_match("198.51.100.20".parse().unwrap()).unwrap();
        assert_eq!(inner.asn, 2906);

        let outer = table.longest_match("198.51.7.1".parse().unwrap()).unwrap();
        assert_eq!(outer.asn, 64500);

        assert!(table.longest_match("192.0.2.1".parse().unwrap()).is_none());
    }

    #[test]
    fn test_ipv6_prefix() {
        let table = AsnTable::new(vec![prefix("2001:db8::/32", 64501, "Valve Corporation")]);
        let record = table.longest_match("2001:db8::1".parse().unwrap()).unwrap();
        assert_eq!(record.org, "Valve Corporation");
        assert!(table.longest_match("198.51.100.1".parse().unwrap()).is_none());
    }

    #[test]
    fn test_org_categories() {
        let map = OrgCategoryMap::default();
        assert_eq!(map.categorize("Netflix Streaming Services Inc."), Some(TrafficLabel::Streaming));
        assert_eq!(map.categorize("Valve Corporation"), Some(TrafficLabel::Gaming));
        assert_eq!(map.categorize("Zoom Video Communications"), Some(TrafficLabel::VideoConference));
        assert_eq!(map.categorize("Example Regional ISP"), None);
    }

    #[test]
    fn test_table_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"network": "203.0.113.0/24", "asn": 64496, "org": "Riot Games"}}]"#
        )
        .unwrap();

        let table = AsnTable::from_file(file.path()).unwrap();
        assert_eq!(table.len(), 1);
        let record = table.longest_match("203.0.113.9".parse().unwrap()).unwrap();
        assert_eq!(record.asn, 64496);
    }

    #[test]
    fn test_bad_table_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(AsnTable::from_file(file.path()), Err(FallbackError::Table(_))));
    }
}
