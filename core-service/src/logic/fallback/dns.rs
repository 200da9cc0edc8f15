//! DNS-based detection
//!
//! Matches a flow's hostname against known service domains. The hostname
//! comes from the flow's own hint (SNI / Host) or from DNS answers the
//! sensor observed for the flow's addresses.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::HostnameResolver;
use crate::logic::features::TrafficLabel;

// ============================================================================
// SERVICE DOMAIN TABLE
// ============================================================================

/// One known service domain. Matches the domain itself and any subdomain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRule {
    pub suffix: String,
    pub label: TrafficLabel,
}

impl DomainRule {
    pub fn new(suffix: &str, label: TrafficLabel) -> Self {
        Self {
            suffix: normalize_host(suffix),
            label,
        }
    }
}

/// Built-in service domains
const DEFAULT_DOMAINS: &[(&str, TrafficLabel)] = &[
    // Streaming
    ("netflix.com", TrafficLabel::Streaming),
    ("nflxvideo.net", TrafficLabel::Streaming),
    ("youtube.com", TrafficLabel::Streaming),
    ("googlevideo.com", TrafficLabel::Streaming),
    ("twitch.tv", TrafficLabel::Streaming),
    ("ttvnw.net", TrafficLabel::Streaming),
    ("primevideo.com", TrafficLabel::Streaming),
    ("disneyplus.com", TrafficLabel::Streaming),
    // Gaming
    ("steampowered.com", TrafficLabel::Gaming),
    ("steamcontent.com", TrafficLabel::Gaming),
    ("riotgames.com", TrafficLabel::Gaming),
    ("epicgames.com", TrafficLabel::Gaming),
    ("xboxlive.com", TrafficLabel::Gaming),
    ("playstation.net", TrafficLabel::Gaming),
    // Video conferencing
    ("zoom.us", TrafficLabel::VideoConference),
    ("teams.microsoft.com", TrafficLabel::VideoConference),
    ("webex.com", TrafficLabel::VideoConference),
    ("meet.google.com", TrafficLabel::VideoConference),
    // VoIP
    ("skype.com", TrafficLabel::Voip),
    ("whatsapp.net", TrafficLabel::Voip),
    // Chat
    ("discord.com", TrafficLabel::Chat),
    ("discord.gg", TrafficLabel::Chat),
    ("slack.com", TrafficLabel::Chat),
    ("telegram.org", TrafficLabel::Chat),
    ("messenger.com", TrafficLabel::Chat),
    // File transfer
    ("dropbox.com", TrafficLabel::FileTransfer),
    ("dropboxusercontent.com", TrafficLabel::FileTransfer),
    ("drive.google.com", TrafficLabel::FileTransfer),
    ("onedrive.live.com", TrafficLabel::FileTransfer),
    ("wetransfer.com", TrafficLabel::FileTransfer),
];

/// Known service domains, longest suffix wins
#[derive(Debug, Clone)]
pub struct ServiceDomainTable {
    rules: Vec<DomainRule>,
}

impl ServiceDomainTable {
    pub fn new(rules: Vec<DomainRule>) -> Self {
        let mut rules: Vec<DomainRule> = rules
            .into_iter()
            .map(|r| DomainRule::new(&r.suffix, r.label))
            .filter(|r| !r.suffix.is_empty())
            .collect();
        rules.sort_by(|a, b| b.suffix.len().cmp(&a.suffix.len()));
        Self { rules }
    }

    pub fn rules(&self) -> &[DomainRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Label for a hostname, if it belongs to a known service
    pub fn match_host(&self, host: &str) -> Option<TrafficLabel> {
        let host = normalize_host(host);
        if host.is_empty() {
            return None;
        }

        self.rules
            .iter()
            .find(|rule| {
                host == rule.suffix
                    || (host.ends_with(&rule.suffix)
                        && host.as_bytes()[host.len() - rule.suffix.len() - 1] == b'.')
            })
            .map(|rule| rule.label)
    }
}

impl Default for ServiceDomainTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_DOMAINS
                .iter()
                .map(|(suffix, label)| DomainRule::new(suffix, *label))
                .collect(),
        )
    }
}

/// Lowercase, trim whitespace and the trailing root dot
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

// ============================================================================
// OBSERVED DNS CACHE
// ============================================================================

/// Bounded, TTL'd map of address → hostname built from observed DNS answers
pub struct DnsCache {
    entries: RwLock<HashMap<IpAddr, (String, Instant)>>,
    capacity: usize,
    ttl: Duration,
}

impl DnsCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Remember that `ip` answered for `hostname`. Returns false when dropped.
    pub fn observe(&self, ip: IpAddr, hostname: &str) -> bool {
        let hostname = normalize_host(hostname);
        if hostname.is_empty() {
            return false;
        }

        let now = Instant::now();
        let mut entries = self.entries.write();

        if entries.len() >= self.capacity && !entries.contains_key(&ip) {
            let ttl = self.ttl;
            entries.retain(|_, (_, seen)| now.duration_since(*seen) < ttl);

            if entries.len() >= self.capacity {
                log::debug!("DNS cache full ({} entries), dropping answer for {}", entries.len(), ip);
                return false;
            }
        }

        entries.insert(ip, (hostname, now));
        true
    }

    /// Hostname last seen for `ip`, unless expired
    pub fn get(&self, ip: &IpAddr) -> Option<String> {
        let entries = self.entries.read();
        entries
            .get(ip)
            .filter(|(_, seen)| seen.elapsed() < self.ttl)
            .map(|(name, _)| name.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HostnameResolver for DnsCache {
    async fn hostname_for(&self, ip: IpAddr) -> Option<String> {
        self.get(&ip)
    }
}
