//! oxide_instance resource
//!
//! Creates an instance together with its disks, network interfaces and
//! external IPs in one request, reconciles the child collections in place
//! on update, and tears the instance down in order on delete: stop, wait
//! for `stopped`, detach disks, delete.

use super::instance_children::{self as children, carry_forward_nics, refreshed_ids};
use super::{api_error, timestamp, Applied, Resource, ResourceResult, ResourceState};
use crate::client::{ClientError, ControlPlane};
use crate::diff::{slice_diff, slice_diff_by};
use crate::plan::{self, PlannedChange};
use crate::schema::{
    Diagnostic, NestingMode, ResourceSchema, SchemaAttribute, SchemaBlock, Validator,
};
use crate::timeouts::{timeouts_attribute, Deadline, Phase, Timeouts};
use crate::wait::{StateChangeConf, WaitError, NOT_FOUND_STATE};
use async_trait::async_trait;
use oxide_common::{
    ExternalIpKind, Instance, InstanceAutoRestartPolicy, InstanceCreate, InstanceState,
    InstanceUpdate,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Largest accepted `user_data` payload after base64 decoding
pub const MAX_USER_DATA_BYTES: usize = 32 * 1024;

/// Run states an instance passes through on its way to `stopped`
const STOP_PENDING: &[&str] = &[
    "creating",
    "starting",
    "running",
    "stopping",
    "rebooting",
    "migrating",
    "repairing",
];
const STOP_DELAY: Duration = Duration::from_secs(1);
const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Network interface as recorded in state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NicModel {
    pub name: String,
    pub description: String,
    pub subnet_id: String,
    pub vpc_id: String,
    pub ip_address: Option<String>,
    pub id: Option<String>,
    pub mac_address: Option<String>,
    pub primary: Option<bool>,
    pub time_created: Option<String>,
    pub time_modified: Option<String>,
}

/// External IP as recorded in state: a pool (ephemeral) or a floating IP
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalIpModel {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceModel {
    pub id: Option<String>,
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub hostname: String,
    pub memory: u64,
    pub ncpus: u16,
    pub start_on_create: Option<bool>,
    pub user_data: Option<String>,
    pub boot_disk_id: Option<String>,
    pub auto_restart_policy: Option<String>,
    pub disk_attachments: Option<Vec<String>>,
    pub network_interfaces: Option<Vec<NicModel>>,
    pub external_ips: Option<Vec<ExternalIpModel>>,
    pub anti_affinity_groups: Option<Vec<String>>,
    pub ssh_public_keys: Option<Vec<String>>,
    pub time_created: Option<String>,
    pub time_modified: Option<String>,
    pub timeouts: Option<Timeouts>,
}

impl InstanceModel {
    fn instance_id(&self) -> ResourceResult<&str> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| vec![Diagnostic::error("Instance state has no id")])
    }

    fn disks(&self) -> &[String] {
        self.disk_attachments.as_deref().unwrap_or_default()
    }

    fn nics(&self) -> &[NicModel] {
        self.network_interfaces.as_deref().unwrap_or_default()
    }

    fn groups(&self) -> &[String] {
        self.anti_affinity_groups.as_deref().unwrap_or_default()
    }

    fn restart_policy(&self) -> ResourceResult<Option<InstanceAutoRestartPolicy>> {
        match self.auto_restart_policy.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|e: oxide_common::Error| {
                vec![Diagnostic::error("Invalid auto restart policy")
                    .with_detail(&e.to_string())
                    .with_attribute(vec!["auto_restart_policy".to_string()])]
            }),
        }
    }

    /// Copy the attributes the server is authoritative for
    fn apply(&mut self, instance: &Instance) {
        self.id = Some(instance.id.clone());
        self.project_id = instance.project_id.clone();
        self.name = instance.name.clone();
        self.description = instance.description.clone();
        self.hostname = instance.hostname.clone();
        self.memory = instance.memory;
        self.ncpus = instance.ncpus;
        self.boot_disk_id = instance.boot_disk_id.clone();
        if let Some(policy) = instance.auto_restart_policy {
            self.auto_restart_policy = Some(policy.as_str().to_string());
        }
        self.time_created = Some(timestamp(&instance.time_created));
        self.time_modified = Some(timestamp(&instance.time_modified));
    }

    /// The boot disk must be one of the attached disks
    fn check_boot_disk(&self) -> ResourceResult<()> {
        match self.boot_disk_id.as_deref() {
            Some(boot) if !self.disks().iter().any(|d| d == boot) => Err(vec![Diagnostic::error(
                "Invalid boot disk",
            )
            .with_detail(&format!(
                "boot_disk_id {:?} must also be listed in disk_attachments",
                boot
            ))
            .with_attribute(vec!["boot_disk_id".to_string()])]),
            _ => Ok(()),
        }
    }
}

/// Child changes an update has to make
#[derive(Debug, Default)]
struct ChildChanges {
    attach: Vec<String>,
    detach: Vec<String>,
    create_nics: Vec<NicModel>,
    delete_nics: Vec<NicModel>,
    join_groups: Vec<String>,
    leave_groups: Vec<String>,
    update_instance: bool,
}

impl ChildChanges {
    fn between(state: &InstanceModel, plan: &InstanceModel) -> Self {
        Self {
            attach: slice_diff(plan.disks(), state.disks()),
            detach: slice_diff(state.disks(), plan.disks()),
            create_nics: slice_diff_by(plan.nics(), state.nics(), NicModel::descriptor),
            delete_nics: slice_diff_by(state.nics(), plan.nics(), NicModel::descriptor),
            join_groups: slice_diff(plan.groups(), state.groups()),
            leave_groups: slice_diff(state.groups(), plan.groups()),
            update_instance: state.boot_disk_id != plan.boot_disk_id
                || (plan.auto_restart_policy.is_some()
                    && state.auto_restart_policy != plan.auto_restart_policy),
        }
    }

    fn is_empty(&self) -> bool {
        self.attach.is_empty()
            && self.detach.is_empty()
            && self.create_nics.is_empty()
            && self.delete_nics.is_empty()
            && self.join_groups.is_empty()
            && self.leave_groups.is_empty()
            && !self.update_instance
    }
}

/// Instance resource
pub struct InstanceResource;

impl InstanceResource {
    pub fn new() -> Self {
        Self
    }

    /// Stop the instance and wait until it reports `stopped` (or is gone)
    async fn stop(
        client: &dyn ControlPlane,
        deadline: &Deadline,
        instance_id: &str,
        target: &[&str],
    ) -> Result<(), WaitError> {
        match deadline.run(client.instance_stop(instance_id)).await {
            Ok(_) => tracing::debug!(instance_id = %instance_id, "stop requested"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let conf = StateChangeConf {
            pending: STOP_PENDING,
            target,
            delay: STOP_DELAY,
            poll_interval: STOP_POLL_INTERVAL,
            timeout: deadline.remaining(),
        };
        conf.wait_for_state(move || async move {
            let instance = deadline.run(client.instance_view(instance_id)).await?;
            let state = instance.run_state.as_str().to_string();
            Ok::<_, ClientError>((instance, state))
        })
        .await?;

        tracing::trace!(instance_id = %instance_id, "instance stopped");
        Ok(())
    }

    async fn build_create_request(
        client: &dyn ControlPlane,
        deadline: &Deadline,
        plan: &InstanceModel,
    ) -> ResourceResult<InstanceCreate> {
        let external_ips =
            children::external_ip_requests(plan.external_ips.as_deref().unwrap_or_default())
                .map_err(|d| vec![d])?;
        let auto_restart_policy = plan.restart_policy()?;

        let (disks, boot_disk) =
            children::disk_attachments(client, deadline, plan.disks(), plan.boot_disk_id.as_deref())
                .await
                .map_err(|e| vec![api_error("Unable to read disk", &e)])?;
        let network_interfaces =
            children::network_interface_attachment(client, deadline, plan.nics())
                .await
                .map_err(|e| {
                    vec![api_error("Unable to resolve network interface VPC or subnet", &e)]
                })?;

        Ok(InstanceCreate {
            name: plan.name.clone(),
            description: plan.description.clone(),
            hostname: plan.hostname.clone(),
            memory: plan.memory,
            ncpus: plan.ncpus,
            start: plan.start_on_create.unwrap_or(true),
            user_data: plan.user_data.clone().unwrap_or_default(),
            disks,
            boot_disk,
            external_ips,
            network_interfaces,
            ssh_public_keys: plan.ssh_public_keys.clone(),
            anti_affinity_groups: plan.groups().to_vec(),
            auto_restart_policy,
        })
    }

    /// Refresh `model` from the server; `None` when the instance is gone
    async fn refresh(
        client: &dyn ControlPlane,
        deadline: &Deadline,
        mut model: InstanceModel,
    ) -> Result<Option<InstanceModel>, ClientError> {
        let instance_id = match model.id.clone() {
            Some(id) => id,
            None => return Ok(None),
        };
        let instance = match deadline.run(client.instance_view(&instance_id)).await {
            Ok(instance) => instance,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        model.apply(&instance);

        let disks = children::attached_disk_ids(client, deadline, &instance_id).await?;
        model.disk_attachments = refreshed_ids(model.disk_attachments.as_ref(), disks);

        let nics = children::network_interfaces(client, deadline, &instance_id, model.nics()).await?;
        model.network_interfaces = if nics.is_empty() {
            model.network_interfaces.filter(|n| n.is_empty())
        } else {
            Some(nics)
        };

        let groups = children::anti_affinity_group_ids(client, deadline, &instance_id).await?;
        model.anti_affinity_groups = refreshed_ids(model.anti_affinity_groups.as_ref(), groups);

        let keys = children::ssh_public_key_ids(client, deadline, &instance_id).await?;
        model.ssh_public_keys = refreshed_ids(model.ssh_public_keys.as_ref(), keys);

        Ok(Some(model))
    }

    /// Apply child changes to a stopped instance
    async fn reconcile(
        client: &dyn ControlPlane,
        deadline: &Deadline,
        instance_id: &str,
        plan: &InstanceModel,
        changes: &ChildChanges,
    ) -> Result<(), Diagnostic> {
        children::attach_disks(client, deadline, instance_id, &changes.attach)
            .await
            .map_err(|e| api_error("Unable to attach disk", &e))?;

        if changes.update_instance {
            let body = InstanceUpdate {
                boot_disk: plan.boot_disk_id.clone(),
                auto_restart_policy: plan.restart_policy().map_err(|mut d| d.remove(0))?,
                memory: plan.memory,
                ncpus: plan.ncpus,
            };
            deadline
                .run(client.instance_update(instance_id, &body))
                .await
                .map_err(|e| api_error("Unable to update instance", &e))?;
            tracing::trace!(instance_id = %instance_id, "updated instance");
        }

        children::detach_disks(client, deadline, instance_id, &changes.detach)
            .await
            .map_err(|e| api_error("Unable to detach disk", &e))?;
        children::delete_network_interfaces(client, deadline, &changes.delete_nics)
            .await
            .map_err(|e| api_error("Unable to delete network interface", &e))?;
        children::create_network_interfaces(client, deadline, instance_id, &changes.create_nics)
            .await
            .map_err(|e| api_error("Unable to create network interface", &e))?;
        children::add_anti_affinity_groups(client, deadline, instance_id, &changes.join_groups)
            .await
            .map_err(|e| api_error("Unable to add instance to anti-affinity group", &e))?;
        children::remove_anti_affinity_groups(client, deadline, instance_id, &changes.leave_groups)
            .await
            .map_err(|e| api_error("Unable to remove instance from anti-affinity group", &e))?;
        Ok(())
    }
}

impl Default for InstanceResource {
    fn default() -> Self {
        Self::new()
    }
}

fn network_interface_block() -> SchemaBlock {
    SchemaBlock::new()
        .with_attribute(
            "name",
            SchemaAttribute::string()
                .with_description("Name of the network interface")
                .required(),
        )
        .with_attribute(
            "description",
            SchemaAttribute::string()
                .with_description("Description of the network interface")
                .required(),
        )
        .with_attribute(
            "subnet_id",
            SchemaAttribute::string()
                .with_description("ID of the VPC subnet the interface lives in")
                .required(),
        )
        .with_attribute(
            "vpc_id",
            SchemaAttribute::string()
                .with_description("ID of the VPC the interface lives in")
                .required(),
        )
        .with_attribute(
            "ip_address",
            SchemaAttribute::string()
                .with_description("IP address of the interface; assigned by the subnet when unset")
                .optional()
                .computed(),
        )
        .with_attribute("id", SchemaAttribute::string().computed())
        .with_attribute("mac_address", SchemaAttribute::string().computed())
        .with_attribute("primary", SchemaAttribute::bool().computed())
        .with_attribute("time_created", SchemaAttribute::string().computed())
        .with_attribute("time_modified", SchemaAttribute::string().computed())
}

fn external_ip_block() -> SchemaBlock {
    SchemaBlock::new()
        .with_attribute(
            "id",
            SchemaAttribute::string()
                .with_description(
                    "IP pool to allocate an ephemeral IP from, or the floating IP to attach",
                )
                .optional()
                .with_default(json!(children::DEFAULT_POOL)),
        )
        .with_attribute(
            "type",
            SchemaAttribute::string()
                .with_description("Kind of external IP")
                .optional()
                .with_default(json!(ExternalIpKind::Ephemeral.as_str()))
                .one_of(ExternalIpKind::values().as_slice()),
        )
}

#[async_trait]
impl Resource for InstanceResource {
    fn type_name(&self) -> &str {
        "oxide_instance"
    }

    fn schema(&self) -> ResourceSchema {
        use crate::schema::AttributeType;

        let block = SchemaBlock::new()
            .with_description("Manages an Oxide instance and its attached disks and network interfaces")
            .with_attribute(
                "id",
                SchemaAttribute::string()
                    .with_description("Unique, immutable, system-controlled identifier")
                    .computed()
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "project_id",
                SchemaAttribute::string()
                    .with_description("ID of the project that will contain the instance")
                    .required()
                    .requires_replace(),
            )
            .with_attribute(
                "name",
                SchemaAttribute::string()
                    .with_description("Name of the instance")
                    .required()
                    .requires_replace(),
            )
            .with_attribute(
                "description",
                SchemaAttribute::string()
                    .with_description("Description for the instance")
                    .required()
                    .requires_replace(),
            )
            .with_attribute(
                "hostname",
                SchemaAttribute::string()
                    .with_description("Hostname of the instance")
                    .required()
                    .requires_replace(),
            )
            .with_attribute(
                "memory",
                SchemaAttribute::number()
                    .with_description("Instance memory in bytes")
                    .required()
                    .requires_replace()
                    .with_validator(Validator::AtLeast { min: 1 }),
            )
            .with_attribute(
                "ncpus",
                SchemaAttribute::number()
                    .with_description("Number of CPUs allocated for this instance")
                    .required()
                    .requires_replace()
                    .with_validator(Validator::AtLeast { min: 1 }),
            )
            .with_attribute(
                "start_on_create",
                SchemaAttribute::bool()
                    .with_description("Starts the instance on creation when true")
                    .optional()
                    .computed()
                    .with_default(json!(true)),
            )
            .with_attribute(
                "user_data",
                SchemaAttribute::string()
                    .with_description("Base64 encoded cloud-init data passed to the instance")
                    .optional()
                    .requires_replace()
                    .with_validator(Validator::Base64 {
                        max_bytes: MAX_USER_DATA_BYTES,
                    }),
            )
            .with_attribute(
                "boot_disk_id",
                SchemaAttribute::string()
                    .with_description("ID of the disk the instance boots from")
                    .optional()
                    .with_validator(Validator::AlsoRequires {
                        attributes: vec!["disk_attachments".to_string()],
                    }),
            )
            .with_attribute(
                "auto_restart_policy",
                SchemaAttribute::string()
                    .with_description("Whether the control plane restarts the instance after a failure")
                    .optional()
                    .computed()
                    .one_of(InstanceAutoRestartPolicy::values().as_slice()),
            )
            .with_attribute(
                "disk_attachments",
                SchemaAttribute::set(AttributeType::String)
                    .with_description("IDs of the disks to attach to the instance")
                    .optional(),
            )
            .with_attribute(
                "network_interfaces",
                SchemaAttribute::nested(NestingMode::List, network_interface_block())
                    .with_description("Network interfaces of the instance")
                    .optional(),
            )
            .with_attribute(
                "external_ips",
                SchemaAttribute::nested(NestingMode::List, external_ip_block())
                    .with_description("External IP addresses provided to this instance")
                    .optional()
                    .requires_replace(),
            )
            .with_attribute(
                "anti_affinity_groups",
                SchemaAttribute::set(AttributeType::String)
                    .with_description("IDs of the anti-affinity groups the instance belongs to")
                    .optional(),
            )
            .with_attribute(
                "ssh_public_keys",
                SchemaAttribute::set(AttributeType::String)
                    .with_description("IDs of the SSH public keys injected into the instance")
                    .optional()
                    .requires_replace(),
            )
            .with_attribute(
                "time_created",
                SchemaAttribute::string()
                    .with_description("Timestamp of when this instance was created")
                    .computed()
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "time_modified",
                SchemaAttribute::string()
                    .with_description("Timestamp of when this instance was last modified")
                    .computed(),
            )
            .with_attribute(
                "timeouts",
                timeouts_attribute(&[Phase::Create, Phase::Read, Phase::Update, Phase::Delete]),
            );

        ResourceSchema::new(0, block)
    }

    async fn create(
        &self,
        client: &dyn ControlPlane,
        planned: &ResourceState,
    ) -> ResourceResult<Applied> {
        let plan: InstanceModel = planned.decode()?;
        plan.check_boot_disk()?;
        let deadline = Timeouts::deadline(plan.timeouts.as_ref(), Phase::Create, "create instance")
            .map_err(|d| vec![d])?;

        let body = Self::build_create_request(client, &deadline, &plan).await?;
        tracing::debug!(project_id = %plan.project_id, name = %plan.name, "creating instance");
        let instance = deadline
            .run(client.instance_create(&plan.project_id, &body))
            .await
            .map_err(|e| vec![api_error("Unable to create instance", &e)])?;
        tracing::info!(instance_id = %instance.id, name = %instance.name, "created instance");

        let mut state = plan.clone();
        state.apply(&instance);

        // The instance exists from here on; failed read-backs only warn
        let mut diagnostics = Vec::new();
        if let Some(nics) = state.network_interfaces.as_mut() {
            for (index, nic) in nics.iter_mut().enumerate() {
                match deadline
                    .run(client.instance_network_interface_view(&instance.id, &nic.name))
                    .await
                {
                    Ok(observed) => {
                        nic.apply(&observed);
                        tracing::trace!(nic_id = %observed.id, name = %observed.name, "read network interface");
                    }
                    Err(e) => diagnostics.push(
                        Diagnostic::warning("Unable to read network interface")
                            .with_detail(&format!("API error: {}", e))
                            .with_attribute(vec!["network_interfaces".to_string(), index.to_string()]),
                    ),
                }
            }
        }

        Ok(Applied::with_diagnostics(
            ResourceState::encode(&state)?,
            diagnostics,
        ))
    }

    async fn read(
        &self,
        client: &dyn ControlPlane,
        current: &ResourceState,
    ) -> ResourceResult<Option<ResourceState>> {
        let model: InstanceModel = current.decode()?;
        let instance_id = model.instance_id()?.to_string();
        let deadline = Timeouts::deadline(model.timeouts.as_ref(), Phase::Read, "read instance")
            .map_err(|d| vec![d])?;

        match Self::refresh(client, &deadline, model).await {
            Ok(Some(model)) => {
                tracing::trace!(instance_id = %instance_id, "read instance");
                Ok(Some(ResourceState::encode(&model)?))
            }
            Ok(None) => {
                tracing::warn!(instance_id = %instance_id, "instance not found, removing from state");
                Ok(None)
            }
            Err(e) => Err(vec![api_error("Unable to read instance", &e)]),
        }
    }

    async fn update(
        &self,
        client: &dyn ControlPlane,
        current: &ResourceState,
        planned: &ResourceState,
    ) -> ResourceResult<Applied> {
        let state: InstanceModel = current.decode()?;
        let mut plan: InstanceModel = planned.decode()?;
        plan.check_boot_disk()?;
        if let Some(nics) = plan.network_interfaces.as_mut() {
            carry_forward_nics(state.nics(), nics);
        }

        let instance_id = state.instance_id()?.to_string();
        let deadline = Timeouts::deadline(plan.timeouts.as_ref(), Phase::Update, "update instance")
            .map_err(|d| vec![d])?;
        let changes = ChildChanges::between(&state, &plan);
        tracing::debug!(instance_id = %instance_id, ?changes, "updating instance");

        let mut diagnostics = Vec::new();
        if !changes.is_empty() {
            let was_stopped = match deadline.run(client.instance_view(&instance_id)).await {
                Ok(instance) => instance.run_state == InstanceState::Stopped,
                Err(e) => return Err(vec![api_error("Unable to read instance", &e)]),
            };

            let result = match Self::stop(client, &deadline, &instance_id, &["stopped"]).await {
                Ok(()) => Self::reconcile(client, &deadline, &instance_id, &plan, &changes).await,
                Err(e) => Err(Diagnostic::error("Unable to stop instance")
                    .with_detail(&e.to_string())),
            };

            match result {
                Ok(()) if !was_stopped => {
                    if let Err(e) = deadline.run(client.instance_start(&instance_id)).await {
                        diagnostics.push(api_error("Unable to start instance", &e));
                    }
                }
                Ok(()) => {}
                Err(diag) => diagnostics.push(diag),
            }
        }

        // Keep the configured values the server does not report
        let mut next = plan.clone();
        next.id = Some(instance_id.clone());
        next.time_created = state.time_created.clone();
        if diagnostics.iter().any(Diagnostic::is_error) {
            next = state.clone();
        }

        match Self::refresh(client, &deadline, next.clone()).await {
            Ok(Some(refreshed)) => next = refreshed,
            Ok(None) => diagnostics.push(
                Diagnostic::error("Instance disappeared during update")
                    .with_detail(&format!("instance {} no longer exists", instance_id)),
            ),
            Err(e) => diagnostics.push(api_error("Unable to read instance after update", &e)),
        }
        tracing::info!(instance_id = %instance_id, "updated instance");

        Ok(Applied::with_diagnostics(
            ResourceState::encode(&next)?,
            diagnostics,
        ))
    }

    async fn delete(&self, client: &dyn ControlPlane, current: &ResourceState) -> ResourceResult<()> {
        let state: InstanceModel = current.decode()?;
        let instance_id = state.instance_id()?;
        let deadline = Timeouts::deadline(state.timeouts.as_ref(), Phase::Delete, "delete instance")
            .map_err(|d| vec![d])?;

        Self::stop(client, &deadline, instance_id, &["stopped", NOT_FOUND_STATE])
            .await
            .map_err(|e| {
                vec![Diagnostic::error("Unable to stop instance").with_detail(&e.to_string())]
            })?;

        children::detach_disks(client, &deadline, instance_id, state.disks())
            .await
            .map_err(|e| vec![api_error("Unable to detach disk", &e)])?;

        match deadline.run(client.instance_delete(instance_id)).await {
            Ok(()) => tracing::info!(instance_id = %instance_id, "deleted instance"),
            Err(e) if e.is_not_found() => {
                tracing::debug!(instance_id = %instance_id, "instance already deleted")
            }
            Err(e) => return Err(vec![api_error("Unable to delete instance", &e)]),
        }
        Ok(())
    }

    fn plan_change(
        &self,
        current: Option<&ResourceState>,
        proposed: &ResourceState,
    ) -> ResourceResult<PlannedChange> {
        let mut change = plan::plan_resource_change(&self.schema().block, current, proposed);
        let Some(current) = current else {
            return Ok(change);
        };

        let prior: InstanceModel = current.decode()?;
        let mut planned: InstanceModel = change.planned_state.decode()?;
        if let Some(nics) = planned.network_interfaces.as_mut() {
            carry_forward_nics(prior.nics(), nics);
            let nics = serde_json::to_value(nics).map_err(|e| {
                vec![Diagnostic::error("Unable to plan network interfaces")
                    .with_detail(&e.to_string())
                    .with_attribute(vec!["network_interfaces".to_string()])]
            })?;
            change.planned_state.set("network_interfaces", nics);
        }
        Ok(change)
    }
}
