//! Bind/peering address resolution.
//!
//! Local runs bind loopback. Automated environments (CI) need a routable
//! address so cluster peers can reach each other, so we discover one from
//! the host's interfaces, preferring the configured subnet.

use std::net::Ipv4Addr;
use std::process::Command;

use tracing::debug;

use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};

/// Resolve the address nodes bind and peer on.
///
/// Order: explicit `STH_BIND_ADDRESS` override, loopback for local runs,
/// then (in CI) a discovered non-loopback IPv4 preferring
/// `STH_SUBNET_PREFIX`, else any non-internal IPv4.
pub fn resolve_bind_address(config: &HarnessConfig) -> HarnessResult<String> {
    if let Some(explicit) = &config.bind_address {
        debug!(address = %explicit, "Using explicit bind address");
        return Ok(explicit.clone());
    }

    if !config.ci {
        return Ok("127.0.0.1".to_string());
    }

    let candidates = host_ipv4_addresses()?;
    if let Some(preferred) = candidates
        .iter()
        .find(|addr| addr.to_string().starts_with(&config.subnet_prefix))
    {
        debug!(address = %preferred, subnet = %config.subnet_prefix, "Discovered subnet-matching address");
        return Ok(preferred.to_string());
    }
    if let Some(any) = candidates.first() {
        debug!(address = %any, "Falling back to first non-internal address");
        return Ok(any.to_string());
    }

    Err(HarnessError::Address(format!(
        "no non-loopback IPv4 address found (subnet prefix '{}')",
        config.subnet_prefix
    )))
}

/// Enumerate non-loopback, non-link-local IPv4 addresses of this host by
/// parsing `ip -o -4 addr show` output.
fn host_ipv4_addresses() -> HarnessResult<Vec<Ipv4Addr>> {
    let output = Command::new("ip")
        .args(["-o", "-4", "addr", "show"])
        .output()
        .map_err(|e| HarnessError::Address(format!("failed to run `ip addr`: {e}")))?;

    if !output.status.success() {
        return Err(HarnessError::Address(format!(
            "`ip addr` exited with {}",
            output.status
        )));
    }

    Ok(parse_ip_addr_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `ip -o -4 addr show` lines into usable addresses.
///
/// Each line looks like:
/// `2: eth0    inet 192.168.1.5/24 brd 192.168.1.255 scope global eth0`
fn parse_ip_addr_output(stdout: &str) -> Vec<Ipv4Addr> {
    let mut addresses = Vec::new();
    for line in stdout.lines() {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token != "inet" {
                continue;
            }
            let Some(cidr) = tokens.next() else { break };
            let Some(raw) = cidr.split('/').next() else { break };
            if let Ok(addr) = raw.parse::<Ipv4Addr>()
                && !addr.is_loopback()
                && !addr.is_link_local()
                && !addr.is_unspecified()
            {
                addresses.push(addr);
            }
            break;
        }
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
2: eth0    inet 10.0.2.15/24 brd 10.0.2.255 scope global dynamic eth0\\       valid_lft 85902sec preferred_lft 85902sec
3: wlan0    inet 192.168.1.42/24 brd 192.168.1.255 scope global wlan0\\       valid_lft forever preferred_lft forever
4: docker0    inet 169.254.7.1/16 scope link docker0\\       valid_lft forever preferred_lft forever
";

    #[test]
    fn test_parse_skips_loopback_and_link_local() {
        let addrs = parse_ip_addr_output(SAMPLE);
        assert_eq!(
            addrs,
            vec![
                "10.0.2.15".parse::<Ipv4Addr>().unwrap(),
                "192.168.1.42".parse::<Ipv4Addr>().unwrap(),
            ]
        );
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_ip_addr_output("").is_empty());
    }

    #[test]
    fn test_explicit_override_wins() {
        let mut config = HarnessConfig::for_tests("/tmp/sth");
        config.bind_address = Some("172.16.0.9".to_string());
        config.ci = true;
        assert_eq!(resolve_bind_address(&config).unwrap(), "172.16.0.9");
    }

    #[test]
    fn test_local_run_binds_loopback() {
        let config = HarnessConfig::for_tests("/tmp/sth");
        assert_eq!(resolve_bind_address(&config).unwrap(), "127.0.0.1");
    }
}
