//! In-memory control plane for tests
//!
//! Records every call in order and keeps just enough server-side state
//! (instances, disks, NICs, VPCs, subnets, firewall rule sets, anti-affinity
//! groups) for the resources to run their full lifecycles against it.

use crate::client::{ClientError, ControlPlane, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use oxide_common::{
    AntiAffinityGroup, Disk, Instance, InstanceCreate, InstanceDiskAttachment, InstanceNetworkInterface,
    InstanceNetworkInterfaceAttachment, InstanceNetworkInterfaceCreate, InstanceState,
    InstanceUpdate, ResultsPage, SshKey, Vpc, VpcFirewallRule, VpcFirewallRuleUpdateParams,
    VpcFirewallRules, VpcSubnet,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Error a faked call should return
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    NotFound,
    Api(u16),
}

impl Failure {
    fn to_error(self, call: &str) -> ClientError {
        match self {
            Failure::NotFound => ClientError::NotFound(format!("injected: {}", call)),
            Failure::Api(status) => ClientError::Api {
                status,
                message: format!("injected: {}", call),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeDisk {
    pub disk: Disk,
    pub attached_to: Option<String>,
}

#[derive(Default)]
pub struct FakeState {
    pub calls: Vec<String>,
    pub instances: BTreeMap<String, Instance>,
    pub disks: BTreeMap<String, FakeDisk>,
    pub vpcs: BTreeMap<String, Vpc>,
    pub subnets: BTreeMap<String, VpcSubnet>,
    pub nics: BTreeMap<String, InstanceNetworkInterface>,
    pub firewall_rules: HashMap<String, Vec<VpcFirewallRule>>,
    /// group id -> member instance ids
    pub anti_affinity_groups: BTreeMap<String, Vec<String>>,
    pub ssh_keys: HashMap<String, Vec<String>>,
    /// Bodies of every instance create call
    pub create_requests: Vec<InstanceCreate>,
    /// Bodies of every firewall rules update call
    pub rule_updates: Vec<VpcFirewallRuleUpdateParams>,
    /// Views an instance spends in `stopping` before it reports `stopped`
    pub stop_polls: u32,
    pending_stop: HashMap<String, u32>,
    failures: HashMap<String, Failure>,
    next_id: u64,
    clock: i64,
}

impl FakeState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn now(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(self.clock)
    }

    fn disk_mut(&mut self, disk: &str) -> Result<&mut FakeDisk> {
        let id = self
            .disks
            .iter()
            .find(|(id, d)| id.as_str() == disk || d.disk.name == disk)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| ClientError::NotFound(format!("disk {}", disk)))?;
        Ok(self.disks.get_mut(&id).unwrap())
    }

    fn instance_mut(&mut self, instance: &str) -> Result<&mut Instance> {
        self.instances
            .get_mut(instance)
            .ok_or_else(|| ClientError::NotFound(format!("instance {}", instance)))
    }

    fn create_nic(
        &mut self,
        instance: &str,
        body: &InstanceNetworkInterfaceCreate,
    ) -> Result<InstanceNetworkInterface> {
        let vpc = self
            .vpcs
            .values()
            .find(|v| v.name == body.vpc_name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("vpc {}", body.vpc_name)))?;
        let subnet = self
            .subnets
            .values()
            .find(|s| s.name == body.subnet_name && s.vpc_id == vpc.id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("subnet {}", body.subnet_name)))?;

        let index = self.next_id;
        let primary = !self.nics.values().any(|n| n.instance_id == instance);
        let id = self.id("nic");
        let now = self.now();
        let nic = InstanceNetworkInterface {
            id: id.clone(),
            name: body.name.clone(),
            description: body.description.clone(),
            instance_id: instance.to_string(),
            subnet_id: subnet.id,
            vpc_id: vpc.id,
            ip: body
                .ip
                .clone()
                .unwrap_or_else(|| format!("172.30.0.{}", 5 + index)),
            mac: format!("A8:40:25:F0:00:{:02X}", index),
            primary,
            time_created: now,
            time_modified: now,
        };
        self.nics.insert(id, nic.clone());
        Ok(nic)
    }
}

/// Recording in-memory [`ControlPlane`]
#[derive(Default)]
pub struct FakeControlPlane {
    inner: Mutex<FakeState>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap()
    }

    /// Calls made so far, e.g. `"instance_stop(inst-1)"`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Calls made so far whose name starts with `prefix`
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Make every call to `method` fail
    pub fn fail(&self, method: &str, failure: Failure) {
        self.state().failures.insert(method.to_string(), failure);
    }

    pub fn with_vpc(self, id: &str, name: &str) -> Self {
        {
            let mut s = self.state();
            let now = s.now();
            s.vpcs.insert(
                id.to_string(),
                Vpc {
                    id: id.to_string(),
                    name: name.to_string(),
                    description: format!("{} vpc", name),
                    dns_name: name.to_string(),
                    ipv6_prefix: "fd00:1122:3344::/48".to_string(),
                    project_id: "proj-1".to_string(),
                    system_router_id: format!("{}-router", id),
                    time_created: now,
                    time_modified: now,
                },
            );
        }
        self
    }

    pub fn with_subnet(self, id: &str, name: &str, vpc_id: &str) -> Self {
        {
            let mut s = self.state();
            let now = s.now();
            s.subnets.insert(
                id.to_string(),
                VpcSubnet {
                    id: id.to_string(),
                    name: name.to_string(),
                    description: format!("{} subnet", name),
                    vpc_id: vpc_id.to_string(),
                    ipv4_block: "172.30.0.0/22".to_string(),
                    ipv6_block: "fd00:1122:3344:100::/64".to_string(),
                    time_created: now,
                    time_modified: now,
                },
            );
        }
        self
    }

    pub fn with_disk(self, id: &str, name: &str) -> Self {
        {
            let mut s = self.state();
            let now = s.now();
            s.disks.insert(
                id.to_string(),
                FakeDisk {
                    disk: Disk {
                        id: id.to_string(),
                        name: name.to_string(),
                        description: String::new(),
                        project_id: "proj-1".to_string(),
                        size: 1 << 30,
                        time_created: now,
                        time_modified: now,
                    },
                    attached_to: None,
                },
            );
        }
        self
    }

    pub fn with_stop_polls(self, polls: u32) -> Self {
        self.state().stop_polls = polls;
        self
    }

    /// Place an instance directly, bypassing the create call
    pub fn with_instance(self, id: &str, run_state: InstanceState, disks: &[&str]) -> Self {
        {
            let mut s = self.state();
            let now = s.now();
            s.instances.insert(
                id.to_string(),
                Instance {
                    id: id.to_string(),
                    name: id.to_string(),
                    description: String::new(),
                    hostname: id.to_string(),
                    memory: 1 << 30,
                    ncpus: 1,
                    project_id: "proj-1".to_string(),
                    run_state,
                    boot_disk_id: None,
                    auto_restart_policy: None,
                    time_created: now,
                    time_modified: now,
                    time_run_state_updated: now,
                },
            );
            for disk in disks {
                if let Some(d) = s.disks.get_mut(*disk) {
                    d.attached_to = Some(id.to_string());
                }
            }
        }
        self
    }

    /// Record `method(args)` and apply any injected failure
    fn enter(&self, method: &str, args: &[&str]) -> Result<MutexGuard<'_, FakeState>> {
        let mut s = self.state();
        s.calls.push(format!("{}({})", method, args.join(", ")));
        match s.failures.get(method) {
            Some(failure) => Err(failure.to_error(method)),
            None => Ok(s),
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn instance_create(&self, project: &str, body: &InstanceCreate) -> Result<Instance> {
        let mut s = self.enter("instance_create", &[project, &body.name])?;
        s.create_requests.push(body.clone());
        let id = s.id("inst");
        let now = s.now();

        let boot_disk_id = match &body.boot_disk {
            Some(InstanceDiskAttachment::Attach { name }) => Some(s.disk_mut(name)?.disk.id.clone()),
            None => None,
        };
        let attach: Vec<&InstanceDiskAttachment> =
            body.disks.iter().chain(body.boot_disk.iter()).collect();
        for InstanceDiskAttachment::Attach { name } in attach {
            s.disk_mut(name)?.attached_to = Some(id.clone());
        }

        if let InstanceNetworkInterfaceAttachment::Create(nics) = &body.network_interfaces {
            for nic in nics {
                s.create_nic(&id, nic)?;
            }
        }
        for group in &body.anti_affinity_groups {
            s.anti_affinity_groups
                .entry(group.clone())
                .or_default()
                .push(id.clone());
        }
        if let Some(keys) = &body.ssh_public_keys {
            s.ssh_keys.insert(id.clone(), keys.clone());
        }

        let instance = Instance {
            id: id.clone(),
            name: body.name.clone(),
            description: body.description.clone(),
            hostname: body.hostname.clone(),
            memory: body.memory,
            ncpus: body.ncpus,
            project_id: project.to_string(),
            run_state: if body.start {
                InstanceState::Starting
            } else {
                InstanceState::Stopped
            },
            boot_disk_id,
            auto_restart_policy: body.auto_restart_policy,
            time_created: now,
            time_modified: now,
            time_run_state_updated: now,
        };
        s.instances.insert(id, instance.clone());
        Ok(instance)
    }

    async fn instance_view(&self, instance: &str) -> Result<Instance> {
        let mut s = self.enter("instance_view", &[instance])?;
        let remaining = s.pending_stop.get(instance).copied();
        match remaining {
            Some(0) => {
                s.pending_stop.remove(instance);
                s.instance_mut(instance)?.run_state = InstanceState::Stopped;
            }
            Some(n) => {
                s.pending_stop.insert(instance.to_string(), n - 1);
            }
            None => {}
        }
        s.instance_mut(instance).map(|i| i.clone())
    }

    async fn instance_update(&self, instance: &str, body: &InstanceUpdate) -> Result<Instance> {
        let mut s = self.enter("instance_update", &[instance])?;
        let boot_disk_id = match &body.boot_disk {
            Some(disk) => Some(s.disk_mut(disk)?.disk.id.clone()),
            None => None,
        };
        let now = s.now();
        let i = s.instance_mut(instance)?;
        i.boot_disk_id = boot_disk_id;
        i.auto_restart_policy = body.auto_restart_policy;
        i.time_modified = now;
        Ok(i.clone())
    }

    async fn instance_start(&self, instance: &str) -> Result<Instance> {
        let mut s = self.enter("instance_start", &[instance])?;
        let i = s.instance_mut(instance)?;
        i.run_state = InstanceState::Starting;
        Ok(i.clone())
    }

    async fn instance_stop(&self, instance: &str) -> Result<Instance> {
        let mut s = self.enter("instance_stop", &[instance])?;
        let polls = s.stop_polls;
        let state = s.instance_mut(instance)?.run_state;
        match state {
            InstanceState::Stopped => {}
            // A migration or repair runs to completion before the stop lands
            InstanceState::Migrating | InstanceState::Repairing => {
                s.pending_stop.insert(instance.to_string(), polls);
            }
            _ => {
                s.instance_mut(instance)?.run_state = InstanceState::Stopping;
                s.pending_stop.insert(instance.to_string(), polls);
            }
        }
        s.instance_mut(instance).map(|i| i.clone())
    }

    async fn instance_delete(&self, instance: &str) -> Result<()> {
        let mut s = self.enter("instance_delete", &[instance])?;
        let state = s.instance_mut(instance)?.run_state;
        if state != InstanceState::Stopped {
            return Err(ClientError::Api {
                status: 400,
                message: format!("instance {} is {}", instance, state),
            });
        }
        s.instances.remove(instance);
        s.nics.retain(|_, n| n.instance_id != instance);
        Ok(())
    }

    async fn instance_disk_list(&self, instance: &str) -> Result<ResultsPage<Disk>> {
        let mut s = self.enter("instance_disk_list", &[instance])?;
        s.instance_mut(instance)?;
        Ok(ResultsPage::new(
            s.disks
                .values()
                .filter(|d| d.attached_to.as_deref() == Some(instance))
                .map(|d| d.disk.clone())
                .collect(),
        ))
    }

    async fn instance_disk_attach(&self, instance: &str, disk: &str) -> Result<Disk> {
        let mut s = self.enter("instance_disk_attach", &[instance, disk])?;
        s.instance_mut(instance)?;
        let d = s.disk_mut(disk)?;
        d.attached_to = Some(instance.to_string());
        Ok(d.disk.clone())
    }

    async fn instance_disk_detach(&self, instance: &str, disk: &str) -> Result<Disk> {
        let mut s = self.enter("instance_disk_detach", &[instance, disk])?;
        let d = s.disk_mut(disk)?;
        d.attached_to = None;
        Ok(d.disk.clone())
    }

    async fn instance_network_interface_list(
        &self,
        instance: &str,
    ) -> Result<ResultsPage<InstanceNetworkInterface>> {
        let s = self.enter("instance_network_interface_list", &[instance])?;
        Ok(ResultsPage::new(
            s.nics
                .values()
                .filter(|n| n.instance_id == instance)
                .cloned()
                .collect(),
        ))
    }

    async fn instance_network_interface_view(
        &self,
        instance: &str,
        interface: &str,
    ) -> Result<InstanceNetworkInterface> {
        let s = self.enter("instance_network_interface_view", &[instance, interface])?;
        s.nics
            .values()
            .find(|n| n.instance_id == instance && (n.name == interface || n.id == interface))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("network interface {}", interface)))
    }

    async fn instance_network_interface_create(
        &self,
        instance: &str,
        body: &InstanceNetworkInterfaceCreate,
    ) -> Result<InstanceNetworkInterface> {
        let mut s = self.enter("instance_network_interface_create", &[instance, &body.name])?;
        s.instance_mut(instance)?;
        s.create_nic(instance, body)
    }

    async fn instance_network_interface_delete(&self, interface: &str) -> Result<()> {
        let mut s = self.enter("instance_network_interface_delete", &[interface])?;
        s.nics
            .remove(interface)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("network interface {}", interface)))
    }

    async fn instance_anti_affinity_group_list(
        &self,
        instance: &str,
    ) -> Result<ResultsPage<AntiAffinityGroup>> {
        let s = self.enter("instance_anti_affinity_group_list", &[instance])?;
        Ok(ResultsPage::new(
            s.anti_affinity_groups
                .iter()
                .filter(|(_, members)| members.iter().any(|m| m == instance))
                .map(|(id, _)| AntiAffinityGroup {
                    id: id.clone(),
                    name: id.clone(),
                    description: String::new(),
                })
                .collect(),
        ))
    }

    async fn anti_affinity_group_member_instance_add(
        &self,
        group: &str,
        instance: &str,
    ) -> Result<()> {
        let mut s = self.enter("anti_affinity_group_member_instance_add", &[group, instance])?;
        s.anti_affinity_groups
            .entry(group.to_string())
            .or_default()
            .push(instance.to_string());
        Ok(())
    }

    async fn anti_affinity_group_member_instance_delete(
        &self,
        group: &str,
        instance: &str,
    ) -> Result<()> {
        let mut s = self.enter("anti_affinity_group_member_instance_delete", &[group, instance])?;
        let members = s
            .anti_affinity_groups
            .get_mut(group)
            .ok_or_else(|| ClientError::NotFound(format!("anti-affinity group {}", group)))?;
        members.retain(|m| m != instance);
        Ok(())
    }

    async fn instance_ssh_public_key_list(&self, instance: &str) -> Result<ResultsPage<SshKey>> {
        let s = self.enter("instance_ssh_public_key_list", &[instance])?;
        Ok(ResultsPage::new(
            s.ssh_keys
                .get(instance)
                .into_iter()
                .flatten()
                .map(|id| SshKey {
                    id: id.clone(),
                    name: id.clone(),
                    description: String::new(),
                })
                .collect(),
        ))
    }

    async fn disk_view(&self, disk: &str) -> Result<Disk> {
        let mut s = self.enter("disk_view", &[disk])?;
        s.disk_mut(disk).map(|d| d.disk.clone())
    }

    async fn vpc_view(&self, vpc: &str, project: Option<&str>) -> Result<Vpc> {
        let s = self.enter("vpc_view", &[vpc, project.unwrap_or("-")])?;
        s.vpcs
            .values()
            .find(|v| v.id == vpc || v.name == vpc)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("vpc {}", vpc)))
    }

    async fn vpc_subnet_view(
        &self,
        subnet: &str,
        vpc: Option<&str>,
        project: Option<&str>,
    ) -> Result<VpcSubnet> {
        let s = self.enter(
            "vpc_subnet_view",
            &[subnet, vpc.unwrap_or("-"), project.unwrap_or("-")],
        )?;
        let vpc_id = match vpc {
            Some(v) => s
                .vpcs
                .values()
                .find(|x| x.id == v || x.name == v)
                .map(|x| x.id.clone()),
            None => None,
        };
        s.subnets
            .values()
            .find(|x| {
                (x.id == subnet || x.name == subnet)
                    && vpc_id.as_ref().map_or(true, |id| &x.vpc_id == id)
            })
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("subnet {}", subnet)))
    }

    async fn vpc_firewall_rules_view(&self, vpc: &str) -> Result<VpcFirewallRules> {
        let s = self.enter("vpc_firewall_rules_view", &[vpc])?;
        if !s.vpcs.contains_key(vpc) {
            return Err(ClientError::NotFound(format!("vpc {}", vpc)));
        }
        Ok(VpcFirewallRules {
            rules: s.firewall_rules.get(vpc).cloned().unwrap_or_default(),
        })
    }

    async fn vpc_firewall_rules_update(
        &self,
        vpc: &str,
        body: &VpcFirewallRuleUpdateParams,
    ) -> Result<VpcFirewallRules> {
        let mut s = self.enter("vpc_firewall_rules_update", &[vpc])?;
        s.rule_updates.push(body.clone());
        if !s.vpcs.contains_key(vpc) {
            return Err(ClientError::NotFound(format!("vpc {}", vpc)));
        }
        let previous = s.firewall_rules.get(vpc).cloned().unwrap_or_default();
        let now = s.now();

        let mut rules = Vec::new();
        for update in &body.rules {
            let (id, time_created) = match previous.iter().find(|r| r.name == update.name) {
                Some(r) => (r.id.clone(), r.time_created),
                None => (s.id("rule"), now),
            };
            rules.push(VpcFirewallRule {
                id,
                name: update.name.clone(),
                description: update.description.clone(),
                action: update.action,
                direction: update.direction,
                filters: update.filters.clone(),
                priority: update.priority,
                status: update.status,
                targets: update.targets.clone(),
                vpc_id: vpc.to_string(),
                time_created,
                time_modified: now,
            });
        }
        // Server order is by name
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        s.firewall_rules.insert(vpc.to_string(), rules.clone());
        Ok(VpcFirewallRules { rules })
    }
}
