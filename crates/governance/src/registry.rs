//! Group and group policy registry
//!
//! Every mutation here bumps the version of the group or policy it touches.
//! Proposals that snapshotted an older version are not touched; they are
//! found stale the next time they are tallied.

use icn_config::EngineConfig;
use icn_storage::Storage;
use tracing::{debug, info};

use crate::address::AddressDeriver;
use crate::error::{GroupError, GroupResult};
use crate::group::{sum_weights, validate_member_requests, Group, Member, MemberRequest};
use crate::policy::{DecisionPolicy, GroupPolicy};
use crate::store::GroupStore;
use crate::types::{validate_metadata, Address, GroupId, Timestamp};

fn require_address(what: &str, address: &Address) -> GroupResult<()> {
    if address.as_str().is_empty() {
        return Err(GroupError::validation(format!("{} address cannot be empty", what)));
    }
    Ok(())
}

fn require_group_admin(group: &Group, caller: &Address) -> GroupResult<()> {
    if group.admin != *caller {
        return Err(GroupError::permission(format!(
            "{} is not the admin of group {}",
            caller, group.id
        )));
    }
    Ok(())
}

fn require_policy_admin(policy: &GroupPolicy, caller: &Address) -> GroupResult<()> {
    if policy.admin != *caller {
        return Err(GroupError::permission(format!(
            "{} is not the admin of group policy {}",
            caller, policy.address
        )));
    }
    Ok(())
}

fn validate_requests(config: &EngineConfig, requests: &[MemberRequest], allow_zero: bool) -> GroupResult<()> {
    validate_member_requests(requests, allow_zero)?;
    for request in requests {
        validate_metadata("member", &request.metadata, config.max_metadata_len)?;
    }
    Ok(())
}

fn bump(version: u64) -> GroupResult<u64> {
    version
        .checked_add(1)
        .ok_or_else(|| GroupError::state("version counter exhausted"))
}

/// Recompute the group's total weight from its stored members and bump its version
fn refresh_group<S: Storage + ?Sized>(store: &mut GroupStore<'_, S>, group: &mut Group) -> GroupResult<()> {
    let members = store.members(group.id)?;
    group.total_weight = sum_weights(members.iter().map(|m| &m.weight))?;
    group.version = bump(group.version)?;
    store.put_group(group)?;
    debug!(
        "Group {} now v{} with {} members, total weight {}",
        group.id,
        group.version,
        members.len(),
        group.total_weight
    );
    Ok(())
}

pub fn create_group<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    config: &EngineConfig,
    admin: &Address,
    members: &[MemberRequest],
    metadata: &str,
    now: Timestamp,
) -> GroupResult<GroupId> {
    require_address("admin", admin)?;
    validate_metadata("group", metadata, config.max_metadata_len)?;
    validate_requests(config, members, false)?;

    let id = store.next_group_id()?;
    let group = Group {
        id,
        admin: admin.clone(),
        metadata: metadata.to_string(),
        version: 1,
        total_weight: sum_weights(members.iter().map(|m| &m.weight))?,
        created_at: now,
    };

    for request in members {
        store.put_member(&Member {
            group_id: id,
            address: request.address.clone(),
            weight: request.weight,
            metadata: request.metadata.clone(),
            added_at: now,
        })?;
    }
    store.put_group(&group)?;

    info!(
        "Created group {} with {} members, total weight {}",
        id,
        members.len(),
        group.total_weight
    );
    Ok(id)
}

/// Insert, re-weight or remove (weight zero) members of a group
pub fn update_group_members<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    config: &EngineConfig,
    caller: &Address,
    group_id: GroupId,
    updates: &[MemberRequest],
    now: Timestamp,
) -> GroupResult<()> {
    if updates.is_empty() {
        return Err(GroupError::validation("member updates cannot be empty"));
    }
    validate_requests(config, updates, true)?;

    let mut group = store.get_group(group_id)?;
    require_group_admin(&group, caller)?;

    for update in updates {
        if update.weight.is_zero() {
            if store.get_member(group_id, &update.address)?.is_none() {
                return Err(GroupError::not_found(format!(
                    "{} is not a member of group {}",
                    update.address, group_id
                )));
            }
            store.delete_member(group_id, &update.address);
        } else {
            store.put_member(&Member {
                group_id,
                address: update.address.clone(),
                weight: update.weight,
                metadata: update.metadata.clone(),
                added_at: now,
            })?;
        }
    }

    refresh_group(store, &mut group)?;
    info!("Updated {} members of group {}", updates.len(), group_id);
    Ok(())
}

pub fn update_group_admin<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    caller: &Address,
    group_id: GroupId,
    new_admin: &Address,
) -> GroupResult<()> {
    require_address("admin", new_admin)?;

    let mut group = store.get_group(group_id)?;
    require_group_admin(&group, caller)?;

    group.admin = new_admin.clone();
    group.version = bump(group.version)?;
    store.put_group(&group)?;

    info!("Group {} admin changed to {}", group_id, new_admin);
    Ok(())
}

pub fn update_group_metadata<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    config: &EngineConfig,
    caller: &Address,
    group_id: GroupId,
    metadata: &str,
) -> GroupResult<()> {
    validate_metadata("group", metadata, config.max_metadata_len)?;

    let mut group = store.get_group(group_id)?;
    require_group_admin(&group, caller)?;

    group.metadata = metadata.to_string();
    group.version = bump(group.version)?;
    store.put_group(&group)?;

    info!("Group {} metadata updated", group_id);
    Ok(())
}

/// A member removes itself from a group
pub fn leave_group<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    member: &Address,
    group_id: GroupId,
) -> GroupResult<()> {
    let mut group = store.get_group(group_id)?;
    if store.get_member(group_id, member)?.is_none() {
        return Err(GroupError::not_found(format!(
            "{} is not a member of group {}",
            member, group_id
        )));
    }

    store.delete_member(group_id, member);
    refresh_group(store, &mut group)?;

    info!("{} left group {}", member, group_id);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn create_group_policy<S: Storage + ?Sized, A: AddressDeriver + ?Sized>(
    store: &mut GroupStore<'_, S>,
    config: &EngineConfig,
    deriver: &A,
    caller: &Address,
    group_id: GroupId,
    decision_policy: DecisionPolicy,
    metadata: &str,
    now: Timestamp,
) -> GroupResult<Address> {
    validate_metadata("group policy", metadata, config.max_metadata_len)?;

    let group = store.get_group(group_id)?;
    require_group_admin(&group, caller)?;
    decision_policy.validate(group.total_weight)?;

    let seq = store.next_policy_seq()?;
    let address = deriver.derive(group_id, seq);
    if store.policy_exists(&address)? {
        return Err(GroupError::state(format!(
            "derived group policy address {} is already taken",
            address
        )));
    }

    let policy = GroupPolicy {
        address: address.clone(),
        group_id,
        admin: group.admin.clone(),
        metadata: metadata.to_string(),
        version: 1,
        decision_policy,
        created_at: now,
    };
    store.put_policy(&policy)?;

    info!("Created group policy {} for group {}", address, group_id);
    Ok(address)
}

/// Load a policy, check the caller administers it, apply `change` and bump its version
fn modify_policy<S, F>(
    store: &mut GroupStore<'_, S>,
    caller: &Address,
    address: &Address,
    change: F,
) -> GroupResult<GroupPolicy>
where
    S: Storage + ?Sized,
    F: FnOnce(&mut GroupPolicy, &Group) -> GroupResult<()>,
{
    let mut policy = store.get_policy(address)?;
    require_policy_admin(&policy, caller)?;
    let group = store.get_group(policy.group_id)?;

    change(&mut policy, &group)?;
    policy.version = bump(policy.version)?;
    store.put_policy(&policy)?;
    Ok(policy)
}

pub fn update_group_policy_decision_policy<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    caller: &Address,
    address: &Address,
    decision_policy: DecisionPolicy,
) -> GroupResult<()> {
    let policy = modify_policy(store, caller, address, |policy, group| {
        decision_policy.validate(group.total_weight)?;
        policy.decision_policy = decision_policy;
        Ok(())
    })?;
    info!("Group policy {} decision policy replaced, now v{}", address, policy.version);
    Ok(())
}

pub fn update_group_policy_admin<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    caller: &Address,
    address: &Address,
    new_admin: &Address,
) -> GroupResult<()> {
    require_address("admin", new_admin)?;
    let policy = modify_policy(store, caller, address, |policy, _| {
        policy.admin = new_admin.clone();
        Ok(())
    })?;
    info!("Group policy {} admin changed to {}, now v{}", address, new_admin, policy.version);
    Ok(())
}

pub fn update_group_policy_metadata<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    config: &EngineConfig,
    caller: &Address,
    address: &Address,
    metadata: &str,
) -> GroupResult<()> {
    validate_metadata("group policy", metadata, config.max_metadata_len)?;
    let policy = modify_policy(store, caller, address, |policy, _| {
        policy.metadata = metadata.to_string();
        Ok(())
    })?;
    info!("Group policy {} metadata updated, now v{}", address, policy.version);
    Ok(())
}
