//! Firewall rules protecting the overlay control plane.
//!
//! The rule set is fixed: it keeps ordinary containers away from the overlay
//! daemon's ports, lets DNS through host firewalls such as UFW, allows
//! traffic across the overlay bridge and hooks a dedicated masquerading
//! chain into `nat POSTROUTING`. Every rule is checked for before it is
//! added, so applying the set repeatedly leaves one copy of each.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::{Command, Output};

use weft_common::{WeftError, WeftResult};

use crate::config::BridgeConfig;
use crate::link::LinkTable;

/// Chain in the `nat` table that the overlay daemon fills with masquerade rules.
pub const NAT_CHAIN: &str = "WEAVE";

/// Where a rule goes in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// At the end of the chain.
    Append,
    /// At a 1-based position.
    Insert(u32),
}

/// One iptables rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    /// Table (`filter`, `nat`).
    pub table: String,
    /// Chain within the table.
    pub chain: String,
    /// Rule specification, compared verbatim for existence.
    pub args: Vec<String>,
    /// Placement when the rule is missing.
    pub placement: Placement,
}

impl FirewallRule {
    /// Rule appended to `table`/`chain`.
    pub fn append<I, S>(table: &str, chain: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.to_string(),
            chain: chain.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            placement: Placement::Append,
        }
    }

    /// Rule inserted at `position` of `table`/`chain`.
    pub fn insert<I, S>(table: &str, chain: &str, position: u32, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            placement: Placement::Insert(position),
            ..Self::append(table, chain, args)
        }
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-t {} {} {}", self.table, self.chain, self.args.join(" "))
    }
}

/// One step of the rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallStep {
    /// Ensure a user chain exists.
    Chain {
        /// Table owning the chain.
        table: String,
        /// Chain name.
        chain: String,
    },
    /// Ensure a rule exists.
    Rule(FirewallRule),
}

/// Access to the live firewall tables.
pub trait RuleTable {
    /// Whether an identical rule is already in its chain.
    fn rule_exists(&self, rule: &FirewallRule) -> WeftResult<bool>;

    /// Add a rule according to its placement.
    fn add_rule(&self, rule: &FirewallRule) -> WeftResult<()>;

    /// Whether a chain exists.
    fn chain_exists(&self, table: &str, chain: &str) -> WeftResult<bool>;

    /// Create a user chain.
    fn new_chain(&self, table: &str, chain: &str) -> WeftResult<()>;
}

/// The ordered rule set for a configuration.
///
/// `container_ip` is the container bridge's own address; control-plane
/// traffic from containers to it is dropped.
#[must_use]
pub fn firewall_plan(config: &BridgeConfig, container_ip: Ipv4Addr) -> Vec<FirewallStep> {
    let container = config.container_bridge.as_str();
    let overlay = config.overlay_bridge.as_str();
    let ip = container_ip.to_string();
    let port = config.port.to_string();
    let adjacent_port = config.port.wrapping_add(1).to_string();

    let mut steps = Vec::new();

    // Must precede the engine's own FORWARD accepts.
    if container != overlay {
        steps.push(FirewallStep::Rule(FirewallRule::insert(
            "filter",
            "FORWARD",
            1,
            ["-i", container, "-o", overlay, "-j", "DROP"],
        )));
    }

    for (protocol, dport) in [("tcp", &port), ("udp", &port), ("udp", &adjacent_port)] {
        steps.push(FirewallStep::Rule(FirewallRule::append(
            "filter",
            "INPUT",
            [
                "-i",
                container,
                "-p",
                protocol,
                "--dst",
                ip.as_str(),
                "--dport",
                dport.as_str(),
                "-j",
                "DROP",
            ],
        )));
    }

    for protocol in ["udp", "tcp"] {
        steps.push(FirewallStep::Rule(FirewallRule::append(
            "filter",
            "INPUT",
            ["-i", container, "-p", protocol, "--dport", "53", "-j", "ACCEPT"],
        )));
    }

    steps.push(FirewallStep::Rule(FirewallRule::append(
        "filter",
        "FORWARD",
        ["-i", overlay, "-o", overlay, "-j", "ACCEPT"],
    )));

    steps.push(FirewallStep::Chain {
        table: "nat".to_string(),
        chain: NAT_CHAIN.to_string(),
    });
    steps.push(FirewallStep::Rule(FirewallRule::append(
        "nat",
        "POSTROUTING",
        ["-j", NAT_CHAIN],
    )));

    steps
}

/// Apply steps in order, skipping what already exists.
///
/// Stops at the first failure; steps already applied stay applied. Returns
/// how many rules or chains were added.
pub fn apply_steps(rules: &dyn RuleTable, steps: &[FirewallStep]) -> WeftResult<usize> {
    let mut added = 0;
    for step in steps {
        match step {
            FirewallStep::Chain { table, chain } => {
                if !rules.chain_exists(table, chain)? {
                    tracing::debug!(table, chain, "Creating chain");
                    rules.new_chain(table, chain)?;
                    added += 1;
                }
            }
            FirewallStep::Rule(rule) => {
                if !rules.rule_exists(rule)? {
                    tracing::debug!(%rule, "Adding firewall rule");
                    rules.add_rule(rule)?;
                    added += 1;
                }
            }
        }
    }
    Ok(added)
}

/// Install the overlay rule set for `config`.
pub fn configure_firewall(
    links: &dyn LinkTable,
    rules: &dyn RuleTable,
    config: &BridgeConfig,
) -> WeftResult<()> {
    let container_ip = device_ipv4(links, &config.container_bridge)?;
    let added = apply_steps(rules, &firewall_plan(config, container_ip))?;
    tracing::info!(
        container_bridge = %config.container_bridge,
        %container_ip,
        added,
        "Firewall rules configured"
    );
    Ok(())
}

/// First IPv4 address of a device.
pub fn device_ipv4(links: &dyn LinkTable, name: &str) -> WeftResult<Ipv4Addr> {
    let link = links.require_link(name)?;
    links
        .ipv4_prefixes(link.index)?
        .first()
        .map(ipnet::Ipv4Net::addr)
        .ok_or_else(|| WeftError::NoIpv4Address {
            device: name.to_string(),
        })
}

/// [`RuleTable`] driving the `iptables` binary.
#[derive(Debug, Clone)]
pub struct Iptables {
    binary: PathBuf,
}

impl Default for Iptables {
    fn default() -> Self {
        Self::new()
    }
}

impl Iptables {
    /// Use `iptables` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("iptables")
    }

    /// Use a specific iptables binary.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[&str]) -> WeftResult<Output> {
        Command::new(&self.binary)
            .arg("-w")
            .args(args)
            .output()
            .map_err(|e| WeftError::Firewall {
                command: args.join(" "),
                stderr: format!("failed to execute {}: {e}", self.binary.display()),
            })
    }

    /// Run a query where exit status 1 means "no".
    fn check(&self, args: &[&str]) -> WeftResult<bool> {
        let output = self.run(args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(failure(args, &output)),
        }
    }

    fn execute(&self, args: &[&str]) -> WeftResult<()> {
        let output = self.run(args)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(failure(args, &output))
        }
    }
}

fn failure(args: &[&str], output: &Output) -> WeftError {
    WeftError::Firewall {
        command: args.join(" "),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

impl RuleTable for Iptables {
    fn rule_exists(&self, rule: &FirewallRule) -> WeftResult<bool> {
        let mut args = vec!["-t", rule.table.as_str(), "-C", rule.chain.as_str()];
        args.extend(rule.args.iter().map(String::as_str));
        self.check(&args)
    }

    fn add_rule(&self, rule: &FirewallRule) -> WeftResult<()> {
        let position;
        let mut args = vec!["-t", rule.table.as_str()];
        match rule.placement {
            Placement::Append => args.extend(["-A", rule.chain.as_str()]),
            Placement::Insert(at) => {
                position = at.to_string();
                args.extend(["-I", rule.chain.as_str(), position.as_str()]);
            }
        }
        args.extend(rule.args.iter().map(String::as_str));
        self.execute(&args)
    }

    fn chain_exists(&self, table: &str, chain: &str) -> WeftResult<bool> {
        self.check(&["-t", table, "-S", chain])
    }

    fn new_chain(&self, table: &str, chain: &str) -> WeftResult<()> {
        self.execute(&["-t", table, "-N", chain])
    }
}
