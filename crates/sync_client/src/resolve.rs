use std::collections::HashMap;

use common::domain::{EntityRef, EntityType, MutationAction, ID_FIELD};
use serde_json::{Map, Value};

/// Rewrite temporary identifiers in `payload` to server identifiers.
///
/// Checks the entity's reference fields, plus the target `id` for updates
/// and deletes. Returns the local id of the first `Create` that has not been
/// reconciled yet.
pub(crate) fn resolve_references(
    action: MutationAction,
    entity_type: EntityType,
    payload: &Map<String, Value>,
    reconciled: &HashMap<u64, i64>,
) -> Result<Map<String, Value>, u64> {
    let mut resolved = payload.clone();

    let target = (action != MutationAction::Create).then_some(ID_FIELD);
    let fields = entity_type
        .reference_fields()
        .iter()
        .copied()
        .chain(target);

    for field in fields {
        let Some(EntityRef::Local(local_id)) = resolved.get(field).and_then(EntityRef::from_value)
        else {
            continue;
        };
        let server_id = reconciled.get(&local_id).copied().ok_or(local_id)?;
        resolved.insert(field.to_string(), Value::from(server_id));
    }

    Ok(resolved)
}
