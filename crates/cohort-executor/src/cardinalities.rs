//! Population shapes and their canonical string form.

use std::collections::BTreeMap;

use cohort_contracts::{Cardinality, Status};

/// Placement name to participant count. A BTreeMap keeps iteration sorted,
/// which makes the canonical string independent of insertion order.
pub type CardinalityMap = BTreeMap<String, u32>;

/// The sole input used to decide executor reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorRequirements {
    pub cardinalities: CardinalityMap,
}

/// Canonical key for a shape, e.g. `clients=3,server=1`.
pub fn cardinalities_to_string(cardinalities: &CardinalityMap) -> String {
    let pairs: Vec<String> = cardinalities
        .iter()
        .map(|(placement, count)| format!("{placement}={count}"))
        .collect();
    pairs.join(",")
}

/// Converts the wire cardinality list into a map. A placement listed twice
/// is a malformed request, not a silent overwrite.
pub fn cardinality_map_from_wire(cardinalities: &[Cardinality]) -> Result<CardinalityMap, Status> {
    let mut map = CardinalityMap::new();
    for c in cardinalities {
        if map.insert(c.placement.clone(), c.count).is_some() {
            return Err(Status::invalid_argument(format!(
                "placement {:?} listed more than once",
                c.placement
            )));
        }
    }
    Ok(map)
}
