//! In-memory host used by unit tests.

use std::collections::{BTreeMap, HashMap};

use ipnet::Ipv4Net;
use parking_lot::Mutex;
use weft_common::{WeftError, WeftResult};

use crate::datapath::{DatapathControl, DatapathSupport};
use crate::firewall::{FirewallRule, RuleTable};
use crate::link::{HardwareAddr, LinkKind, LinkTable, NetworkLink};
use crate::netns::{NamespaceId, NamespaceProbe};

const DEFAULT_MTU: u32 = 1500;

#[derive(Default)]
struct State {
    links: BTreeMap<u32, NetworkLink>,
    prefixes: HashMap<u32, Vec<Ipv4Net>>,
    next_index: u32,
    rules: Vec<FirewallRule>,
    chains: Vec<(String, String)>,
    vports: Vec<(u32, String)>,
    offload_disabled: Vec<String>,
    mutations: usize,
    datapath_probes: usize,
    datapath_unsupported: bool,
    fail_lookups: bool,
    fail_operations: Vec<String>,
    fail_rules: Vec<String>,
}

impl State {
    fn by_name(&self, name: &str) -> Option<&NetworkLink> {
        self.links.values().find(|link| link.name == name)
    }

    fn insert(&mut self, name: &str, kind: LinkKind, mtu: u32) -> u32 {
        self.next_index += 1;
        let index = self.next_index;
        self.links.insert(
            index,
            NetworkLink {
                name: name.to_string(),
                kind,
                index,
                parent_index: 0,
                master_index: 0,
                address: None,
                mtu,
                up: false,
            },
        );
        index
    }

    fn mutate(&mut self, operation: &str) -> WeftResult<()> {
        if self.fail_operations.iter().any(|op| op == operation) {
            return Err(WeftError::netlink(operation, "injected failure"));
        }
        self.mutations += 1;
        Ok(())
    }

    fn link_mut(&mut self, index: u32) -> WeftResult<&mut NetworkLink> {
        self.links.get_mut(&index).ok_or_else(|| WeftError::LinkNotFound {
            name: format!("#{index}"),
        })
    }
}

/// Fake link table, datapath and firewall sharing one state.
#[derive(Default)]
pub(crate) struct FakeHost {
    state: Mutex<State>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a link without counting it as a mutation. Returns its index.
    pub(crate) fn insert_link(&self, name: &str, kind: LinkKind) -> u32 {
        self.state.lock().insert(name, kind, DEFAULT_MTU)
    }

    pub(crate) fn add_prefix(&self, index: u32, prefix: Ipv4Net) {
        self.state.lock().prefixes.entry(index).or_default().push(prefix);
    }

    pub(crate) fn update_link(&self, name: &str, update: impl FnOnce(&mut NetworkLink)) {
        let mut state = self.state.lock();
        if let Some(link) = state.links.values_mut().find(|link| link.name == name) {
            update(link);
        }
    }

    pub(crate) fn fail_lookups(&self) {
        self.state.lock().fail_lookups = true;
    }

    pub(crate) fn fail_operation(&self, operation: &str) {
        self.state.lock().fail_operations.push(operation.to_string());
    }

    pub(crate) fn fail_rule_containing(&self, needle: &str) {
        self.state.lock().fail_rules.push(needle.to_string());
    }

    pub(crate) fn without_datapath_support(&self) {
        self.state.lock().datapath_unsupported = true;
    }

    pub(crate) fn link(&self, name: &str) -> Option<NetworkLink> {
        self.state.lock().by_name(name).cloned()
    }

    pub(crate) fn link_names(&self) -> Vec<String> {
        self.state.lock().links.values().map(|link| link.name.clone()).collect()
    }

    pub(crate) fn is_up(&self, name: &str) -> bool {
        self.state.lock().by_name(name).is_some_and(|link| link.up)
    }

    pub(crate) fn rules(&self) -> Vec<FirewallRule> {
        self.state.lock().rules.clone()
    }

    pub(crate) fn chains(&self) -> Vec<(String, String)> {
        self.state.lock().chains.clone()
    }

    pub(crate) fn vports(&self) -> Vec<(u32, String)> {
        self.state.lock().vports.clone()
    }

    pub(crate) fn offload_disabled(&self) -> Vec<String> {
        self.state.lock().offload_disabled.clone()
    }

    pub(crate) fn mutations(&self) -> usize {
        self.state.lock().mutations
    }

    pub(crate) fn datapath_probes(&self) -> usize {
        self.state.lock().datapath_probes
    }
}

impl LinkTable for FakeHost {
    fn link_by_name(&self, name: &str) -> WeftResult<Option<NetworkLink>> {
        let state = self.state.lock();
        if state.fail_lookups {
            return Err(WeftError::netlink(format!("link get {name}"), "injected failure"));
        }
        Ok(state.by_name(name).cloned())
    }

    fn links(&self) -> WeftResult<Vec<NetworkLink>> {
        let state = self.state.lock();
        if state.fail_lookups {
            return Err(WeftError::netlink("link dump", "injected failure"));
        }
        Ok(state.links.values().cloned().collect())
    }

    fn ipv4_prefixes(&self, index: u32) -> WeftResult<Vec<Ipv4Net>> {
        Ok(self
            .state
            .lock()
            .prefixes
            .get(&index)
            .cloned()
            .unwrap_or_default())
    }

    fn add_bridge(&self, name: &str, address: HardwareAddr, mtu: u32) -> WeftResult<()> {
        let mut state = self.state.lock();
        state.mutate("add_bridge")?;
        let index = state.insert(name, LinkKind::Bridge, mtu);
        state.link_mut(index)?.address = Some(address);
        Ok(())
    }

    fn add_veth(&self, name: &str, peer: &str, mtu: Option<u32>) -> WeftResult<()> {
        let mut state = self.state.lock();
        state.mutate("add_veth")?;
        let mtu = mtu.unwrap_or(DEFAULT_MTU);
        let local = state.insert(name, LinkKind::Veth, mtu);
        let remote = state.insert(peer, LinkKind::Veth, mtu);
        state.link_mut(local)?.parent_index = remote;
        state.link_mut(remote)?.parent_index = local;
        Ok(())
    }

    fn set_mtu(&self, index: u32, mtu: u32) -> WeftResult<()> {
        let mut state = self.state.lock();
        state.mutate("set_mtu")?;
        state.link_mut(index)?.mtu = mtu;
        Ok(())
    }

    fn set_master(&self, index: u32, master: u32) -> WeftResult<()> {
        let mut state = self.state.lock();
        state.mutate("set_master")?;
        state.link_mut(index)?.master_index = master;
        Ok(())
    }

    fn set_up(&self, index: u32) -> WeftResult<()> {
        let mut state = self.state.lock();
        state.mutate("set_up")?;
        state.link_mut(index)?.up = true;
        Ok(())
    }

    fn set_address(&self, index: u32, address: HardwareAddr) -> WeftResult<()> {
        let mut state = self.state.lock();
        state.mutate("set_address")?;
        state.link_mut(index)?.address = Some(address);
        Ok(())
    }

    fn disable_tx_offload(&self, name: &str) -> WeftResult<()> {
        let mut state = self.state.lock();
        state.mutate("disable_tx_offload")?;
        if state.by_name(name).is_none() {
            return Err(WeftError::LinkNotFound {
                name: name.to_string(),
            });
        }
        state.offload_disabled.push(name.to_string());
        Ok(())
    }
}

impl DatapathControl for FakeHost {
    fn create_datapath(&self, name: &str) -> WeftResult<DatapathSupport> {
        let mut state = self.state.lock();
        state.datapath_probes += 1;
        if state.fail_operations.iter().any(|op| op == "create_datapath") {
            return Err(WeftError::Datapath {
                message: "create_datapath: injected failure".to_string(),
            });
        }
        if state.datapath_unsupported {
            return Ok(DatapathSupport::Unsupported);
        }
        if state.by_name(name).is_none() {
            state.insert(name, LinkKind::Datapath, DEFAULT_MTU);
        }
        Ok(DatapathSupport::Supported)
    }

    fn add_interface(&self, datapath_index: u32, interface: &str) -> WeftResult<()> {
        let mut state = self.state.lock();
        if state.fail_operations.iter().any(|op| op == "add_interface") {
            return Err(WeftError::Datapath {
                message: "add_interface: injected failure".to_string(),
            });
        }
        state.vports.push((datapath_index, interface.to_string()));
        Ok(())
    }
}

impl RuleTable for FakeHost {
    fn rule_exists(&self, rule: &FirewallRule) -> WeftResult<bool> {
        Ok(self.state.lock().rules.iter().any(|existing| {
            existing.table == rule.table && existing.chain == rule.chain && existing.args == rule.args
        }))
    }

    fn add_rule(&self, rule: &FirewallRule) -> WeftResult<()> {
        let mut state = self.state.lock();
        let text = rule.to_string();
        if state.fail_rules.iter().any(|needle| text.contains(needle.as_str())) {
            return Err(WeftError::Firewall {
                command: text,
                stderr: "iptables: injected failure".to_string(),
            });
        }
        state.rules.push(rule.clone());
        Ok(())
    }

    fn chain_exists(&self, table: &str, chain: &str) -> WeftResult<bool> {
        Ok(self
            .state
            .lock()
            .chains
            .iter()
            .any(|(t, c)| t == table && c == chain))
    }

    fn new_chain(&self, table: &str, chain: &str) -> WeftResult<()> {
        self.state
            .lock()
            .chains
            .push((table.to_string(), chain.to_string()));
        Ok(())
    }
}

/// Fake namespaces: each pid maps to a namespace id and a link table.
#[derive(Default)]
pub(crate) struct FakeNamespaces {
    namespaces: Mutex<HashMap<i32, (NamespaceId, Vec<(NetworkLink, Vec<Ipv4Net>)>)>>,
}

impl FakeNamespaces {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_process(&self, pid: i32, id: NamespaceId) {
        self.namespaces.lock().entry(pid).or_insert((id, Vec::new()));
    }

    pub(crate) fn add_link(&self, pid: i32, link: NetworkLink, prefixes: Vec<Ipv4Net>) {
        if let Some((_, links)) = self.namespaces.lock().get_mut(&pid) {
            links.push((link, prefixes));
        }
    }
}

impl NamespaceProbe for FakeNamespaces {
    fn namespace_id(&self, pid: i32) -> WeftResult<Option<NamespaceId>> {
        Ok(self.namespaces.lock().get(&pid).map(|(id, _)| *id))
    }

    fn find_devices(
        &self,
        pid: i32,
        predicate: &(dyn Fn(&NetworkLink) -> bool + Sync),
    ) -> WeftResult<Vec<crate::netns::DiscoveredDevice>> {
        let namespaces = self.namespaces.lock();
        let Some((_, links)) = namespaces.get(&pid) else {
            return Ok(Vec::new());
        };
        Ok(links
            .iter()
            .filter(|(link, _)| predicate(link))
            .map(|(link, prefixes)| crate::netns::DiscoveredDevice::new(link, prefixes.clone()))
            .collect())
    }
}

/// Link snapshot for namespace fixtures.
pub(crate) fn link(name: &str, kind: LinkKind, index: u32) -> NetworkLink {
    NetworkLink {
        name: name.to_string(),
        kind,
        index,
        parent_index: 0,
        master_index: 0,
        address: Some(HardwareAddr([0x02, 0, 0, 0, 0, index.to_le_bytes()[0]])),
        mtu: DEFAULT_MTU,
        up: true,
    }
}
