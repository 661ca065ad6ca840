//! Foraging action integrators: collect, eat, and berry regeneration.
//!
//! Runs after the movement phase each tick, in the fixed order
//! collect -> eat -> regen.

use std::collections::HashMap;

use crate::state::World;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectResult {
    pub entity_id: String,
    pub object_id: Option<String>,
    pub amount_collected: u32,
    pub failure_reason: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EatResult {
    pub entity_id: String,
    pub item_type: String,
    pub amount_eaten: u32,
    pub failure_reason: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectChange {
    pub object_id: String,
    pub field: &'static str,
    pub old_value: String,
    pub new_value: String,
}

pub struct CollectIntent {
    pub entity_id: String,
    pub object_id: Option<String>,
    pub item_type: String,
    /// Requested berry count; `None` (or absent) requests the implicit
    /// default of one.
    pub amount: Option<u32>,
}

const DEFAULT_COLLECT_AMOUNT: u32 = 1;

pub struct EatIntent {
    pub entity_id: String,
    pub item_type: String,
    pub amount: u32,
}

const DEFAULT_MAX_BERRIES: u32 = 5;
const BERRY_OBJECT_TYPE: &str = "bush";
const BERRY_ITEM_TYPE: &str = "berry";

/// Resolve a batch of collect intents against bush objects.
///
/// An explicit `object_id` must name an existing object at the entity's
/// position. An implicit intent (no `object_id`) resolves to the
/// lexicographically smallest `object_id` of a bush at that position —
/// deterministic regardless of registry insertion order.
pub fn process_collect_phase(
    world: &mut World,
    intents: &[CollectIntent],
) -> (Vec<CollectResult>, Vec<ObjectChange>) {
    let mut results = Vec::new();
    let mut changes = Vec::new();

    // Group collectors by the object they ultimately target.
    let mut claims_by_object: HashMap<String, Vec<&CollectIntent>> = HashMap::new();
    let mut unresolved = Vec::new();

    for intent in intents {
        let entity = match world.get_entity(&intent.entity_id) {
            Ok(e) => e,
            Err(_) => {
                unresolved.push((intent, "entity_not_found"));
                continue;
            }
        };
        let position = entity.position;

        let object_id = match &intent.object_id {
            Some(id) => {
                match world.get_object(id) {
                    Ok(obj) if obj.position == position => Some(id.clone()),
                    Ok(_) => {
                        unresolved.push((intent, "object_not_at_position"));
                        None
                    }
                    Err(_) => {
                        unresolved.push((intent, "object_not_found"));
                        None
                    }
                }
            }
            None => {
                let mut bush_ids: Vec<String> = world
                    .get_objects_at(position)
                    .into_iter()
                    .filter(|o| o.object_type == BERRY_OBJECT_TYPE)
                    .map(|o| o.object_id.clone())
                    .collect();
                bush_ids.sort();
                match bush_ids.into_iter().next() {
                    Some(id) => Some(id),
                    None => {
                        unresolved.push((intent, "no_collectible_object"));
                        None
                    }
                }
            }
        };

        if let Some(object_id) = object_id {
            claims_by_object.entry(object_id).or_default().push(intent);
        }
    }

    for (intent, reason) in unresolved {
        results.push(CollectResult {
            entity_id: intent.entity_id.clone(),
            object_id: intent.object_id.clone(),
            amount_collected: 0,
            failure_reason: Some(reason),
        });
    }

    for (object_id, mut claimants) in claims_by_object {
        claimants.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

        let object = world.get_object(&object_id).unwrap().clone();
        let mut remaining: u32 = object
            .get_state("berry_count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let old_remaining = remaining;

        for intent in claimants {
            if remaining == 0 {
                results.push(CollectResult {
                    entity_id: intent.entity_id.clone(),
                    object_id: Some(object_id.clone()),
                    amount_collected: 0,
                    failure_reason: Some("no_berries"),
                });
                continue;
            }
            let requested = intent.amount.unwrap_or(DEFAULT_COLLECT_AMOUNT);
            let take = remaining.min(requested);
            remaining -= take;

            let entity = world.get_entity(&intent.entity_id).unwrap();
            let new_inventory = entity.inventory.add(BERRY_ITEM_TYPE, take);
            world
                .update_entity_inventory(&intent.entity_id, new_inventory)
                .expect("entity validated above");

            results.push(CollectResult {
                entity_id: intent.entity_id.clone(),
                object_id: Some(object_id.clone()),
                amount_collected: take,
                failure_reason: None,
            });
        }

        if remaining != old_remaining {
            let updated = object.with_state("berry_count", remaining.to_string());
            world.update_object(updated).expect("object validated above");
            changes.push(ObjectChange {
                object_id: object_id.clone(),
                field: "berry_count",
                old_value: old_remaining.to_string(),
                new_value: remaining.to_string(),
            });
        }
    }

    (results, changes)
}

/// Resolve a batch of eat intents: each either succeeds or fails with
/// `insufficient_items`, independent of other entities.
pub fn process_eat_phase(world: &mut World, intents: &[EatIntent]) -> Vec<EatResult> {
    intents
        .iter()
        .map(|intent| {
            let entity = match world.get_entity(&intent.entity_id) {
                Ok(e) => e,
                Err(_) => {
                    return EatResult {
                        entity_id: intent.entity_id.clone(),
                        item_type: intent.item_type.clone(),
                        amount_eaten: 0,
                        failure_reason: Some("entity_not_found"),
                    }
                }
            };

            if !entity.inventory.has(&intent.item_type, intent.amount) {
                return EatResult {
                    entity_id: intent.entity_id.clone(),
                    item_type: intent.item_type.clone(),
                    amount_eaten: 0,
                    failure_reason: Some("insufficient_items"),
                };
            }

            let new_inventory = entity
                .inventory
                .remove(&intent.item_type, intent.amount)
                .expect("checked via has() above");
            world
                .update_entity_inventory(&intent.entity_id, new_inventory)
                .expect("entity validated above");

            EatResult {
                entity_id: intent.entity_id.clone(),
                item_type: intent.item_type.clone(),
                amount_eaten: intent.amount,
                failure_reason: None,
            }
        })
        .collect()
}

/// Regenerate one berry per bush, up to that bush's `max_berries`, every
/// `regen_rate` ticks.
pub fn process_regeneration(world: &mut World, tick: u64, regen_rate: u64) -> Vec<ObjectChange> {
    if regen_rate == 0 || tick % regen_rate != 0 {
        return Vec::new();
    }

    let bush_ids: Vec<String> = world
        .all_objects()
        .filter(|o| o.object_type == BERRY_OBJECT_TYPE)
        .map(|o| o.object_id.clone())
        .collect();

    let mut changes = Vec::new();
    for object_id in bush_ids {
        let object = world.get_object(&object_id).unwrap().clone();
        let count: u32 = object
            .get_state("berry_count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let max: u32 = object
            .get_state("max_berries")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_BERRIES);

        if count >= max {
            continue;
        }
        let new_count = count + 1;
        let updated = object.with_state("berry_count", new_count.to_string());
        world.update_object(updated).expect("object validated above");
        changes.push(ObjectChange {
            object_id,
            field: "berry_count",
            old_value: count.to_string(),
            new_value: new_count.to_string(),
        });
    }
    changes
}
