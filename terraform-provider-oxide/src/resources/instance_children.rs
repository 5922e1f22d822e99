//! Instance child collections
//!
//! Disks, network interfaces, external IPs and anti-affinity groups hang off
//! an instance. At create time they are folded into the single create
//! request; on update they are reconciled one element at a time from the
//! difference between the prior state and the plan.

use super::instance::{ExternalIpModel, NicModel};
use super::timestamp;
use crate::client::{self, ControlPlane};
use crate::schema::Diagnostic;
use crate::timeouts::Deadline;
use oxide_common::{
    ExternalIpCreate, ExternalIpKind, InstanceDiskAttachment, InstanceNetworkInterface,
    InstanceNetworkInterfaceAttachment, InstanceNetworkInterfaceCreate,
};

/// Pool name that stands for the silo's default IP pool
pub(crate) const DEFAULT_POOL: &str = "default";

// ============================================================================
// Create request pieces
// ============================================================================

/// Disk attachments for a create request, with the boot disk split out.
///
/// The API attaches by name, so each id is looked up first.
pub(crate) async fn disk_attachments(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    disk_ids: &[String],
    boot_disk_id: Option<&str>,
) -> client::Result<(Vec<InstanceDiskAttachment>, Option<InstanceDiskAttachment>)> {
    let mut disks = Vec::with_capacity(disk_ids.len());
    let mut boot_disk = None;

    for disk_id in disk_ids {
        let disk = deadline.run(client.disk_view(disk_id)).await?;
        let attachment = InstanceDiskAttachment::Attach { name: disk.name };
        if boot_disk_id == Some(disk_id.as_str()) {
            boot_disk = Some(attachment);
        } else {
            disks.push(attachment);
        }
    }

    Ok((disks, boot_disk))
}

/// Create parameters for one NIC, resolving its VPC and subnet ids to names
pub(crate) async fn network_interface_create(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    nic: &NicModel,
) -> client::Result<InstanceNetworkInterfaceCreate> {
    let vpc = deadline.run(client.vpc_view(&nic.vpc_id, None)).await?;
    let subnet = deadline
        .run(client.vpc_subnet_view(&nic.subnet_id, None, None))
        .await?;

    Ok(InstanceNetworkInterfaceCreate {
        name: nic.name.clone(),
        description: nic.description.clone(),
        subnet_name: subnet.name,
        vpc_name: vpc.name,
        ip: nic.ip_address.clone().filter(|ip| !ip.is_empty()),
    })
}

/// NIC attachment for a create request: `none` when no NICs are declared
pub(crate) async fn network_interface_attachment(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    nics: &[NicModel],
) -> client::Result<InstanceNetworkInterfaceAttachment> {
    if nics.is_empty() {
        return Ok(InstanceNetworkInterfaceAttachment::None);
    }

    let mut params = Vec::with_capacity(nics.len());
    for nic in nics {
        params.push(network_interface_create(client, deadline, nic).await?);
    }
    Ok(InstanceNetworkInterfaceAttachment::Create(params))
}

/// External IPs for a create request
pub(crate) fn external_ip_requests(ips: &[ExternalIpModel]) -> Result<Vec<ExternalIpCreate>, Diagnostic> {
    let mut requests = Vec::with_capacity(ips.len());

    for (index, ip) in ips.iter().enumerate() {
        let path = |field: &str| {
            vec![
                "external_ips".to_string(),
                index.to_string(),
                field.to_string(),
            ]
        };

        let kind = match ip.kind.as_deref() {
            None | Some("") => ExternalIpKind::Ephemeral,
            Some(raw) => raw.parse::<ExternalIpKind>().map_err(|e| {
                Diagnostic::error("Invalid external IP")
                    .with_detail(&e.to_string())
                    .with_attribute(path("type"))
            })?,
        };
        let id = ip.id.clone().filter(|id| !id.is_empty());

        requests.push(match kind {
            ExternalIpKind::Ephemeral => ExternalIpCreate::Ephemeral {
                pool: id.filter(|pool| pool != DEFAULT_POOL),
            },
            ExternalIpKind::Floating => ExternalIpCreate::Floating {
                floating_ip: id.ok_or_else(|| {
                    Diagnostic::error("Missing floating IP")
                        .with_detail("An external IP of type floating must set id to the floating IP")
                        .with_attribute(path("id"))
                })?,
            },
        });
    }

    Ok(requests)
}

// ============================================================================
// Update reconcilers
// ============================================================================

pub(crate) async fn attach_disks(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    instance_id: &str,
    disk_ids: &[String],
) -> client::Result<()> {
    for disk_id in disk_ids {
        deadline
            .run(client.instance_disk_attach(instance_id, disk_id))
            .await?;
        tracing::trace!(instance_id = %instance_id, disk_id = %disk_id, "attached disk");
    }
    Ok(())
}

/// Detach each disk; one that is already gone counts as detached
pub(crate) async fn detach_disks(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    instance_id: &str,
    disk_ids: &[String],
) -> client::Result<()> {
    for disk_id in disk_ids {
        match deadline
            .run(client.instance_disk_detach(instance_id, disk_id))
            .await
        {
            Ok(_) => {
                tracing::trace!(instance_id = %instance_id, disk_id = %disk_id, "detached disk")
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(instance_id = %instance_id, disk_id = %disk_id, "disk already detached")
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub(crate) async fn create_network_interfaces(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    instance_id: &str,
    nics: &[NicModel],
) -> client::Result<()> {
    for nic in nics {
        let body = network_interface_create(client, deadline, nic).await?;
        let created = deadline
            .run(client.instance_network_interface_create(instance_id, &body))
            .await?;
        tracing::trace!(
            instance_id = %instance_id,
            nic_id = %created.id,
            name = %created.name,
            "created network interface"
        );
    }
    Ok(())
}

/// Delete NICs by their server id, primary last
pub(crate) async fn delete_network_interfaces(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    nics: &[NicModel],
) -> client::Result<()> {
    let mut ordered: Vec<&NicModel> = nics.iter().collect();
    // The primary interface can only go once no secondary ones remain
    ordered.sort_by_key(|nic| nic.primary.unwrap_or(false));

    for nic in ordered {
        let Some(nic_id) = nic.id.as_deref().filter(|id| !id.is_empty()) else {
            tracing::warn!(name = %nic.name, "network interface has no id recorded, skipping delete");
            continue;
        };
        match deadline
            .run(client.instance_network_interface_delete(nic_id))
            .await
        {
            Ok(()) => tracing::trace!(nic_id = %nic_id, "deleted network interface"),
            Err(e) if e.is_not_found() => {
                tracing::debug!(nic_id = %nic_id, "network interface already deleted")
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub(crate) async fn add_anti_affinity_groups(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    instance_id: &str,
    group_ids: &[String],
) -> client::Result<()> {
    for group_id in group_ids {
        deadline
            .run(client.anti_affinity_group_member_instance_add(group_id, instance_id))
            .await?;
        tracing::trace!(instance_id = %instance_id, group_id = %group_id, "joined anti-affinity group");
    }
    Ok(())
}

pub(crate) async fn remove_anti_affinity_groups(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    instance_id: &str,
    group_ids: &[String],
) -> client::Result<()> {
    for group_id in group_ids {
        match deadline
            .run(client.anti_affinity_group_member_instance_delete(group_id, instance_id))
            .await
        {
            Ok(()) => {
                tracing::trace!(instance_id = %instance_id, group_id = %group_id, "left anti-affinity group")
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// ============================================================================
// Read back
// ============================================================================

pub(crate) async fn attached_disk_ids(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    instance_id: &str,
) -> client::Result<Vec<String>> {
    let page = deadline.run(client.instance_disk_list(instance_id)).await?;
    Ok(page.items.into_iter().map(|d| d.id).collect())
}

pub(crate) async fn anti_affinity_group_ids(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    instance_id: &str,
) -> client::Result<Vec<String>> {
    let page = deadline
        .run(client.instance_anti_affinity_group_list(instance_id))
        .await?;
    Ok(page.items.into_iter().map(|g| g.id).collect())
}

pub(crate) async fn ssh_public_key_ids(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    instance_id: &str,
) -> client::Result<Vec<String>> {
    let page = deadline
        .run(client.instance_ssh_public_key_list(instance_id))
        .await?;
    Ok(page.items.into_iter().map(|k| k.id).collect())
}

/// Observed NICs, in the order `prior` lists them with new ones appended
pub(crate) async fn network_interfaces(
    client: &dyn ControlPlane,
    deadline: &Deadline,
    instance_id: &str,
    prior: &[NicModel],
) -> client::Result<Vec<NicModel>> {
    let mut observed = deadline
        .run(client.instance_network_interface_list(instance_id))
        .await?
        .items;

    let mut nics = Vec::with_capacity(observed.len());
    for known in prior {
        let position = observed.iter().position(|o| match known.id.as_deref() {
            Some(id) if !id.is_empty() => o.id == id,
            _ => o.name == known.name,
        });
        if let Some(position) = position {
            nics.push(NicModel::observed(&observed.remove(position)));
        }
    }
    nics.extend(observed.iter().map(NicModel::observed));
    Ok(nics)
}

/// Refreshed value of a set-of-ids attribute.
///
/// Nothing observed leaves the attribute null, except that an explicitly
/// empty set stays empty.
pub(crate) fn refreshed_ids(prior: Option<&Vec<String>>, observed: Vec<String>) -> Option<Vec<String>> {
    if observed.is_empty() {
        return prior.filter(|p| p.is_empty()).cloned();
    }
    let prior = prior.map(Vec::as_slice).unwrap_or_default();
    Some(order_like(prior, observed))
}

/// `observed` reordered to follow `prior`, unknown entries appended
pub(crate) fn order_like(prior: &[String], mut observed: Vec<String>) -> Vec<String> {
    let mut ordered = Vec::with_capacity(observed.len());
    for id in prior {
        if let Some(position) = observed.iter().position(|o| o == id) {
            ordered.push(observed.remove(position));
        }
    }
    ordered.extend(observed);
    ordered
}

// ============================================================================
// NIC planning
// ============================================================================

impl NicModel {
    pub(crate) fn observed(nic: &InstanceNetworkInterface) -> Self {
        let mut model = NicModel {
            name: nic.name.clone(),
            description: nic.description.clone(),
            subnet_id: nic.subnet_id.clone(),
            vpc_id: nic.vpc_id.clone(),
            ..Default::default()
        };
        model.apply(nic);
        model
    }

    /// Copy the server-assigned fields of `nic`
    pub(crate) fn apply(&mut self, nic: &InstanceNetworkInterface) {
        self.id = Some(nic.id.clone());
        self.ip_address = Some(nic.ip.clone());
        self.mac_address = Some(nic.mac.clone());
        self.primary = Some(nic.primary);
        self.time_created = Some(timestamp(&nic.time_created));
        self.time_modified = Some(timestamp(&nic.time_modified));
    }

    /// Fields whose change turns into a delete plus a create
    pub(crate) fn descriptor(&self) -> (String, String, String, String, Option<String>) {
        (
            self.name.clone(),
            self.description.clone(),
            self.subnet_id.clone(),
            self.vpc_id.clone(),
            self.ip_address.clone(),
        )
    }

    fn same_interface(&self, prior: &NicModel) -> bool {
        self.name == prior.name
            && self.description == prior.description
            && self.subnet_id == prior.subnet_id
            && self.vpc_id == prior.vpc_id
            && self
                .ip_address
                .as_ref()
                .map_or(true, |ip| prior.ip_address.as_ref() == Some(ip))
    }

    fn clear_computed(&mut self) {
        self.id = None;
        self.mac_address = None;
        self.primary = None;
        self.time_created = None;
        self.time_modified = None;
    }
}

/// Carry computed fields forward onto planned NICs that match a prior one.
///
/// A NIC with any descriptor change is a new interface, so its computed
/// fields are left unknown.
pub(crate) fn carry_forward_nics(prior: &[NicModel], planned: &mut [NicModel]) {
    for nic in planned.iter_mut() {
        match prior.iter().find(|p| nic.same_interface(p)) {
            Some(p) => {
                nic.ip_address = p.ip_address.clone();
                nic.id = p.id.clone();
                nic.mac_address = p.mac_address.clone();
                nic.primary = p.primary;
                nic.time_created = p.time_created.clone();
                nic.time_modified = p.time_modified.clone();
            }
            None => nic.clear_computed(),
        }
    }
}
