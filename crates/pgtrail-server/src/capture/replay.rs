//! Row-state replay
//!
//! Rebuilds the state of a tracked row from its audit records: an INSERT snapshot, UPDATEs
//! applying `changed_fields` over the old row, a DELETE ending the row.

use crate::resolver::models::ActionType;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// One attribute that differs between two row states
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeChange {
    pub attribute: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Row state right after an action.
pub fn state_after(
    action_type: ActionType,
    row_data: Option<&Map<String, Value>>,
    changed_fields: Option<&Map<String, Value>>,
) -> Option<Map<String, Value>> {
    match action_type {
        ActionType::Insert => row_data.cloned(),
        ActionType::Update => {
            let mut state = row_data.cloned().unwrap_or_default();
            if let Some(changed) = changed_fields {
                for (key, value) in changed {
                    state.insert(key.clone(), value.clone());
                }
            }
            Some(state)
        },
        ActionType::Delete | ActionType::Truncate => None,
        ActionType::Select => row_data.cloned(),
    }
}

/// Final row state after replaying actions in action-id order.
pub fn replay<'a, I>(actions: I) -> Option<Map<String, Value>>
where
    I: IntoIterator<
        Item = (
            ActionType,
            Option<&'a Map<String, Value>>,
            Option<&'a Map<String, Value>>,
        ),
    >,
{
    actions
        .into_iter()
        .fold(None, |_, (action_type, row_data, changed)| {
            state_after(action_type, row_data, changed)
        })
}

/// Attribute-level differences, sorted by attribute name.
pub fn diff(
    before: Option<&Map<String, Value>>,
    after: Option<&Map<String, Value>>,
) -> Vec<AttributeChange> {
    let keys: BTreeSet<&String> = before
        .into_iter()
        .flat_map(|m| m.keys())
        .chain(after.into_iter().flat_map(|m| m.keys()))
        .collect();

    keys.into_iter()
        .filter_map(|key| {
            let old = before.and_then(|m| m.get(key));
            let new = after.and_then(|m| m.get(key));
            (old != new).then(|| AttributeChange {
                attribute: key.clone(),
                old: old.cloned(),
                new: new.cloned(),
            })
        })
        .collect()
}
