//! TXT record resolution
//!
//! Provisioning decisions only ever need TXT lookups, so the resolver
//! seam is exactly that: a name in, the set of TXT strings out.

use crate::error::{Result, TossmailError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use trust_dns_resolver::config::*;
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

/// Resolves the TXT records published at a name.
///
/// An empty Vec means the name resolved but carries no TXT records;
/// errors are reserved for lookups that could not complete.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>>;
}

/// Resolver backed by the system DNS configuration
pub struct SystemTxtResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl SystemTxtResolver {
    pub fn new(timeout: Duration) -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver, timeout }
    }
}

#[async_trait]
impl TxtResolver for SystemTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        debug!("Looking up TXT records for {}", name);

        let lookup = match tokio::time::timeout(self.timeout, self.resolver.txt_lookup(name)).await
        {
            Err(_) => {
                warn!("TXT lookup for {} timed out", name);
                return Err(TossmailError::DnsLookup(format!(
                    "TXT lookup for {} timed out",
                    name
                )));
            }
            Ok(Err(e)) => {
                // Absent records are a normal answer, not a failure
                if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) {
                    return Ok(Vec::new());
                }
                warn!("TXT lookup failed for {}: {}", name, e);
                return Err(TossmailError::DnsLookup(format!(
                    "TXT lookup for {} failed: {}",
                    name, e
                )));
            }
            Ok(Ok(lookup)) => lookup,
        };

        // A record split across segments is one logical string
        let values = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|segment| String::from_utf8_lossy(segment))
                    .collect::<String>()
            })
            .collect();

        Ok(values)
    }
}
