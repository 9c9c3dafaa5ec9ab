use std::net::IpAddr;
use anyhow::Result;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};

pub async fn resolve_host_to_ip(host: &str) -> Result<IpAddr> {
    // First try to parse as IP address
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    // Printers on a LAN often only resolve through the system resolver (mDNS, hosts file)
    let addr = format!("{}:0", host);
    if let Ok(mut addrs) = tokio::net::lookup_host(&addr).await {
        if let Some(found) = addrs.next() {
            return Ok(found.ip());
        }
    }

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
    let lookup = resolver.lookup_ip(host).await?;
    lookup
        .iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Could not resolve hostname: {}", host))
}
