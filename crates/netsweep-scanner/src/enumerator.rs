//! Target enumeration
//!
//! Expands the configured networks into the finite target stream one sweep
//! consumes: every interior host of every CIDR, crossed with the enabled
//! sweep modes and the configured port list. Enumeration is all-or-nothing;
//! a single bad network literal fails the sweep before any scanning starts.
//!
//! Interior hosts exclude the network and broadcast addresses for every
//! IPv4 prefix shorter than `/32`. That rule is applied uniformly, so a
//! `/31` contributes zero hosts even though RFC 3021 would allow both of
//! its addresses.

use ipnetwork::IpNetwork;
use netsweep_core::{Error, Result, SweepConfig, SweepMode, Target, TargetMetadata};
use std::net::Ipv4Addr;
use tracing::debug;

/// Shift widths at or above this are rejected before any `1 << n`
const MAX_SHIFT_WIDTH: u32 = 63;

/// Expand the configuration into the full target list for one sweep.
///
/// Targets are ordered network by network, host by host, with each host's
/// ICMP target (when enabled) ahead of its TCP targets. Every target
/// carries [`TargetMetadata`] naming the originating network and its
/// interior-host count.
///
/// # Errors
///
/// - [`Error::InvalidCidr`] for unparsable literals or IPv6 prefixes
///   shorter than the address width
/// - [`Error::CidrMaskTooLarge`] when expansion would shift by 63+ bits
/// - [`Error::CapacityOverflow`] when the pre-allocation arithmetic
///   overflows
pub fn enumerate_targets(config: &SweepConfig) -> Result<Vec<Target>> {
    let icmp = config.mode_enabled(SweepMode::Icmp);
    let tcp = config.mode_enabled(SweepMode::Tcp);

    // Parse and size every network before emitting anything
    let mut parsed = Vec::with_capacity(config.networks.len());
    for literal in &config.networks {
        let network: IpNetwork = literal
            .parse()
            .map_err(|e| Error::InvalidCidr(format!("{}: {}", literal, e)))?;
        let host_count = interior_host_count(&network, literal)?;
        parsed.push((literal.as_str(), network, host_count));
    }

    let host_counts: Vec<u64> = parsed.iter().map(|(_, _, count)| *count).collect();
    let capacity = estimated_capacity(&host_counts, config.ports.len(), icmp, tcp)?;
    let capacity = usize::try_from(capacity)
        .map_err(|_| Error::CapacityOverflow(format!("{} targets exceed address space", capacity)))?;

    let mut targets = Vec::with_capacity(capacity);
    for (literal, network, host_count) in parsed {
        let metadata = TargetMetadata {
            network: literal.to_string(),
            total_hosts: host_count,
        };

        for host in expand_hosts(&network, None) {
            if icmp {
                targets.push(Target::icmp(host.clone()).with_metadata(metadata.clone()));
            }
            if tcp {
                for &port in &config.ports {
                    targets.push(Target::tcp(host.clone(), port).with_metadata(metadata.clone()));
                }
            }
        }
    }

    debug!(
        networks = config.networks.len(),
        targets = targets.len(),
        "enumerated sweep targets"
    );
    Ok(targets)
}

/// Interior host count of one network.
///
/// `/32` counts its single address; shorter IPv4 prefixes count
/// `2^(32-p) - 2` (network and broadcast excluded). IPv6 literals count
/// only as single hosts.
fn interior_host_count(network: &IpNetwork, literal: &str) -> Result<u64> {
    match network {
        IpNetwork::V4(net) => {
            let shift = 32 - u32::from(net.prefix());
            if shift >= MAX_SHIFT_WIDTH {
                return Err(Error::CidrMaskTooLarge(format!(
                    "{}: shift width {}",
                    literal, shift
                )));
            }
            if net.prefix() == 32 {
                Ok(1)
            } else {
                Ok((1u64 << shift) - 2)
            }
        }
        IpNetwork::V6(net) => {
            let shift = 128 - u32::from(net.prefix());
            if shift >= MAX_SHIFT_WIDTH {
                return Err(Error::CidrMaskTooLarge(format!(
                    "{}: shift width {}",
                    literal, shift
                )));
            }
            if net.prefix() == 128 {
                Ok(1)
            } else {
                Err(Error::InvalidCidr(format!(
                    "{}: IPv6 prefixes are not expanded",
                    literal
                )))
            }
        }
    }
}

/// Sum of per-network target counts, every step overflow-checked
fn estimated_capacity(host_counts: &[u64], ports: usize, icmp: bool, tcp: bool) -> Result<u64> {
    let overflow = || Error::CapacityOverflow("target-count pre-allocation".to_string());

    let mut total: u64 = 0;
    for &hosts in host_counts {
        let mut per_network: u64 = 0;
        if icmp {
            per_network = per_network.checked_add(hosts).ok_or_else(overflow)?;
        }
        if tcp {
            let tcp_targets = hosts.checked_mul(ports as u64).ok_or_else(overflow)?;
            per_network = per_network.checked_add(tcp_targets).ok_or_else(overflow)?;
        }
        total = total.checked_add(per_network).ok_or_else(overflow)?;
    }
    Ok(total)
}

/// Yield the interior host addresses of `network` in increasing order.
///
/// `cap` bounds emission and exists for unit tests over large prefixes
/// (the tests use 1000); production enumeration always passes `None`.
fn expand_hosts(network: &IpNetwork, cap: Option<usize>) -> Vec<String> {
    match network {
        IpNetwork::V4(net) => {
            if net.prefix() == 32 {
                return vec![net.ip().to_string()];
            }

            let first = u32::from(net.network());
            let last = u32::from(net.broadcast());
            let mut hosts = Vec::new();

            // Skip the network address (first) and broadcast (last)
            let mut addr = first.saturating_add(1);
            while addr < last {
                hosts.push(Ipv4Addr::from(addr).to_string());
                if cap.is_some_and(|limit| hosts.len() >= limit) {
                    break;
                }
                addr += 1;
            }
            hosts
        }
        // Single-host IPv6 literals pass through verbatim
        IpNetwork::V6(net) => vec![net.ip().to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(networks: &[&str], ports: &[u16], modes: &[SweepMode]) -> SweepConfig {
        SweepConfig {
            networks: networks.iter().map(|s| s.to_string()).collect(),
            ports: ports.to_vec(),
            sweep_modes: modes.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_slash_30_both_modes_one_port() {
        let cfg = config(
            &["192.168.1.0/30"],
            &[22],
            &[SweepMode::Icmp, SweepMode::Tcp],
        );
        let targets = enumerate_targets(&cfg).unwrap();

        // 2 interior hosts x (1 icmp + 1 tcp)
        assert_eq!(targets.len(), 4);
        let hosts: Vec<&str> = targets.iter().map(|t| t.host.as_str()).collect();
        assert_eq!(
            hosts,
            vec!["192.168.1.1", "192.168.1.1", "192.168.1.2", "192.168.1.2"]
        );
        assert_eq!(targets[0].mode, SweepMode::Icmp);
        assert_eq!(targets[1].mode, SweepMode::Tcp);
        assert_eq!(targets[1].port, Some(22));
    }

    #[test]
    fn test_slash_31_yields_nothing() {
        let cfg = config(&["10.0.0.0/31"], &[80], &[SweepMode::Icmp, SweepMode::Tcp]);
        let targets = enumerate_targets(&cfg).unwrap();
        assert!(targets.is_empty());
    }

    #[test]
    fn test_slash_32_single_host() {
        let cfg = config(&["10.1.2.3/32"], &[80, 443], &[SweepMode::Tcp]);
        let targets = enumerate_targets(&cfg).unwrap();

        assert_eq!(targets.len(), 2);
        assert!(targets.iter().all(|t| t.host == "10.1.2.3"));
        let ports: Vec<u16> = targets.iter().filter_map(|t| t.port).collect();
        assert_eq!(ports, vec![80, 443]);
    }

    #[test]
    fn test_bare_ip_parses_as_single_host() {
        let cfg = config(&["10.1.2.3"], &[], &[SweepMode::Icmp]);
        let targets = enumerate_targets(&cfg).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].host, "10.1.2.3");
    }

    #[test]
    fn test_tcp_mode_with_empty_ports_yields_nothing() {
        let cfg = config(&["192.0.2.0/32"], &[], &[SweepMode::Tcp]);
        let targets = enumerate_targets(&cfg).unwrap();
        assert!(targets.is_empty());
    }

    #[test]
    fn test_invalid_cidr() {
        let cfg = config(&["not-a-cidr"], &[80], &[SweepMode::Tcp]);
        assert!(matches!(
            enumerate_targets(&cfg),
            Err(Error::InvalidCidr(_))
        ));
    }

    #[test]
    fn test_all_or_nothing() {
        // The second network is bad; nothing is returned for the first
        let cfg = config(
            &["192.168.1.0/30", "bogus/99"],
            &[80],
            &[SweepMode::Icmp],
        );
        assert!(enumerate_targets(&cfg).is_err());
    }

    #[test]
    fn test_ipv6_single_host_passes_through() {
        let cfg = config(&["2001:db8::1/128"], &[443], &[SweepMode::Tcp]);
        let targets = enumerate_targets(&cfg).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].host, "2001:db8::1");
        assert_eq!(targets[0].metadata.as_ref().unwrap().total_hosts, 1);
    }

    #[test]
    fn test_ipv6_narrow_prefix_invalid() {
        // Shift width under 63, so this fails as an unexpanded prefix
        let cfg = config(&["2001:db8::/120"], &[443], &[SweepMode::Tcp]);
        assert!(matches!(
            enumerate_targets(&cfg),
            Err(Error::InvalidCidr(_))
        ));
    }

    #[test]
    fn test_ipv6_wide_prefix_mask_too_large() {
        let cfg = config(&["2001:db8::/32"], &[443], &[SweepMode::Tcp]);
        assert!(matches!(
            enumerate_targets(&cfg),
            Err(Error::CidrMaskTooLarge(_))
        ));
    }

    #[test]
    fn test_metadata_carries_network_and_budget() {
        let cfg = config(&["172.16.0.0/29"], &[8080], &[SweepMode::Tcp]);
        let targets = enumerate_targets(&cfg).unwrap();

        // /29 has 6 interior hosts
        assert_eq!(targets.len(), 6);
        for target in &targets {
            let meta = target.metadata.as_ref().unwrap();
            assert_eq!(meta.network, "172.16.0.0/29");
            assert_eq!(meta.total_hosts, 6);
        }
    }

    #[test]
    fn test_enumeration_is_deterministic() {
        let cfg = config(
            &["192.168.0.0/28", "10.9.8.7/32"],
            &[22, 80],
            &[SweepMode::Icmp, SweepMode::Tcp],
        );
        let first = enumerate_targets(&cfg).unwrap();
        let second = enumerate_targets(&cfg).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_capacity_overflow_detected() {
        let near_max = u64::MAX / 2;
        let result = estimated_capacity(&[near_max, near_max], 3, true, true);
        assert!(matches!(result, Err(Error::CapacityOverflow(_))));
    }

    #[test]
    fn test_capacity_matches_emission() {
        let counts = [2u64, 1];
        // icmp + 3 tcp ports per host
        let capacity = estimated_capacity(&counts, 3, true, true).unwrap();
        assert_eq!(capacity, 3 * 1 + 3 * 3);
    }

    #[test]
    fn test_expand_cap_bounds_large_prefixes() {
        let network: IpNetwork = "10.0.0.0/16".parse().unwrap();
        let hosts = expand_hosts(&network, Some(1000));
        assert_eq!(hosts.len(), 1000);
        assert_eq!(hosts[0], "10.0.0.1");
    }

    #[test]
    fn test_expand_skips_network_and_broadcast() {
        let network: IpNetwork = "192.168.5.0/30".parse().unwrap();
        let hosts = expand_hosts(&network, None);
        assert_eq!(hosts, vec!["192.168.5.1", "192.168.5.2"]);
    }
}
