//! Fallback Module - heuristics for uncertain flows
//!
//! When the model is Uncertain, two ordered heuristics run before giving up:
//! 1. DNS: the flow's hostname against known service domains
//! 2. ASN: the flow's source address → AS organization → coarse category
//!
//! Every lookup is bounded by a timeout. A lookup that fails or times out
//! counts as unresolved.

pub mod asn;
pub mod dns;

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::confidence::FallbackKind;
use crate::logic::features::TrafficLabel;

pub use asn::{AsnPrefix, AsnRecord, AsnTable, OrgCategoryMap, OrgRule};
pub use dns::{normalize_host, DnsCache, DomainRule, ServiceDomainTable};

// ============================================================================
// RESOLVER CAPABILITIES
// ============================================================================

/// Address → hostname (observed DNS answers, reverse lookups, ...)
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    async fn hostname_for(&self, ip: IpAddr) -> Option<String>;
}

/// Address → AS organization
#[async_trait]
pub trait AsnResolver: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Option<AsnRecord>;
}

#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    #[error("fallback table error: {0}")]
    Table(String),
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    /// Extra service domains, checked together with the built-in table
    pub domains: Vec<DomainRule>,
    /// Extra organization keywords, checked before the built-in ones
    pub org_rules: Vec<OrgRule>,
    pub asn_table_path: Option<String>,
    pub dns_cache_capacity: usize,
    pub dns_cache_ttl_secs: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: constants::DEFAULT_FALLBACK_TIMEOUT_MS,
            domains: Vec::new(),
            org_rules: Vec::new(),
            asn_table_path: None,
            dns_cache_capacity: constants::DEFAULT_DNS_CACHE_CAPACITY,
            dns_cache_ttl_secs: constants::DEFAULT_DNS_CACHE_TTL_SECS,
        }
    }
}

impl FallbackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================================
// FLOW CONTEXT
// ============================================================================

/// Side signals about a flow, supplied at ingestion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    pub source_ip: Option<IpAddr>,
    pub destination_ip: Option<IpAddr>,
    /// Hostname hint (SNI, HTTP Host, DNS query) if the sensor saw one
    pub hostname: Option<String>,
}

// ============================================================================
// FALLBACK CHAIN
// ============================================================================

/// Ordered DNS → ASN heuristics
pub struct FallbackChain {
    domains: ServiceDomainTable,
    org_categories: OrgCategoryMap,
    hostnames: Option<Arc<dyn HostnameResolver>>,
    asn: Option<Arc<dyn AsnResolver>>,
    timeout: Duration,
}

impl FallbackChain {
    pub fn new(domains: ServiceDomainTable, org_categories: OrgCategoryMap, timeout: Duration) -> Self {
        Self {
            domains,
            org_categories,
            hostnames: None,
            asn: None,
            timeout,
        }
    }

    /// Build from config; the DNS cache is shared with the ingestion side
    pub fn from_config(config: &FallbackConfig, dns_cache: Option<Arc<DnsCache>>) -> Result<Self, FallbackError> {
        let mut domain_rules: Vec<DomainRule> = config.domains.clone();
        domain_rules.extend(default_domain_rules());

        let mut org_rules = config.org_rules.clone();
        org_rules.extend(default_org_rules());

        let mut chain = Self::new(
            ServiceDomainTable::new(domain_rules),
            OrgCategoryMap::new(org_rules),
            config.timeout(),
        );

        if let Some(cache) = dns_cache {
            chain = chain.with_hostname_resolver(cache);
        }

        if let Some(path) = &config.asn_table_path {
            chain = chain.with_asn_resolver(Arc::new(AsnTable::from_file(Path::new(path))?));
        }

        Ok(chain)
    }

    pub fn with_hostname_resolver(mut self, resolver: Arc<dyn HostnameResolver>) -> Self {
        self.hostnames = Some(resolver);
        self
    }

    pub fn with_asn_resolver(mut self, resolver: Arc<dyn AsnResolver>) -> Self {
        self.asn = Some(resolver);
        self
    }

    /// Run DNS then ASN detection; first label found wins
    pub async fn resolve(&self, ctx: &FlowContext) -> Option<(TrafficLabel, FallbackKind)> {
        if let Some(label) = self.detect_dns(ctx).await {
            return Some((label, FallbackKind::Dns));
        }
        if let Some(label) = self.detect_asn(ctx).await {
            return Some((label, FallbackKind::Asn));
        }
        None
    }

    /// Hostname hint first, then names observed for the flow's addresses
    pub async fn detect_dns(&self, ctx: &FlowContext) -> Option<TrafficLabel> {
        if let Some(label) = ctx.hostname.as_deref().and_then(|h| self.domains.match_host(h)) {
            log::debug!("DNS detection: hint {:?} -> {}", ctx.hostname, label);
            return Some(label);
        }

        let resolver = self.hostnames.as_ref()?;
        for ip in [ctx.destination_ip, ctx.source_ip].into_iter().flatten() {
            match tokio::time::timeout(self.timeout, resolver.hostname_for(ip)).await {
                Ok(Some(host)) => {
                    if let Some(label) = self.domains.match_host(&host) {
                        log::debug!("DNS detection: {} ({}) -> {}", ip, host, label);
                        return Some(label);
                    }
                }
                Ok(None) => {}
                Err(_) => log::debug!("Hostname lookup for {} timed out after {:?}", ip, self.timeout),
            }
        }

        None
    }

    /// Source address → AS organization → category
    pub async fn detect_asn(&self, ctx: &FlowContext) -> Option<TrafficLabel> {
        let resolver = self.asn.as_ref()?;
        let ip = ctx.source_ip?;

        let record = match tokio::time::timeout(self.timeout, resolver.lookup(ip)).await {
            Ok(record) => record?,
            Err(_) => {
                log::debug!("ASN lookup for {} timed out after {:?}", ip, self.timeout);
                return None;
            }
        };

        let label = self.org_categories.categorize(&record.org)?;
        log::debug!("ASN fallback: {} -> AS{} {} -> {}", ip, record.asn, record.org, label);
        Some(label)
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new(
            ServiceDomainTable::default(),
            OrgCategoryMap::default(),
            Duration::from_millis(constants::DEFAULT_FALLBACK_TIMEOUT_MS),
        )
    }
}

fn default_domain_rules() -> Vec<DomainRule> {
    ServiceDomainTable::default().rules().to_vec()
}

fn default_org_rules() -> Vec<OrgRule> {
    OrgCategoryMap::default().rules().to_vec()
}
