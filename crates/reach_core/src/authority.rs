use shared::domain::{EntitySnapshot, SessionSnapshot};

/// Whether this session is the one that should write reconciled state for
/// `entity`. Fails closed when the local user is unknown.
pub fn is_authoritative(entity: &EntitySnapshot, session: &SessionSnapshot) -> bool {
    let Some(local) = session.local_user() else {
        return false;
    };

    if local.role.is_privileged() {
        return true;
    }

    let privileged_elsewhere = session
        .users
        .iter()
        .any(|user| user.id != local.id && user.active && user.role.is_privileged());
    if privileged_elsewhere {
        return false;
    }

    entity.owners.contains(&local.id)
}

/// Whether the local user may edit `entity` at all (HUD clicks).
pub fn can_modify(entity: &EntitySnapshot, session: &SessionSnapshot) -> bool {
    session
        .local_user()
        .is_some_and(|local| local.role.is_privileged() || entity.owners.contains(&local.id))
}

#[cfg(test)]
#[path = "tests/authority_tests.rs"]
mod tests;
