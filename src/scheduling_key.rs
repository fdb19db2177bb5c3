use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::job::{Affinity, NodeSelector, Toleration};
use crate::resource::ResourceVector;

/// An opaque fingerprint over `(node selector, affinity, tolerations, requests,
/// priority)`, used to deduplicate infeasibility decisions within one round.
///
/// Equality/hashing are all that matters to callers; the fingerprint itself is
/// never round-tripped outside the process it was computed in, so a non-portable
/// hash is an acceptable implementation (the round and its caches are both
/// documented as ephemeral, one per invocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulingKey(u64);

/// Computes [`SchedulingKey`]s, retaining intern tables so repeated strings
/// (selector keys/values, toleration fields, affinity expressions) hash in
/// amortised constant time instead of being re-hashed character by character on
/// every call.
pub trait SchedulingKeyGenerator: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn key(
        &mut self,
        node_selector: &NodeSelector,
        affinity: &Affinity,
        tolerations: &[Toleration],
        requests: &ResourceVector,
        priority: i32,
    ) -> SchedulingKey;
}

/// Reference implementation: interns every string it sees into a dense `u32` id,
/// then folds the sorted id sequence (plus the resource vector's compact string
/// and the numeric priority) into a single hash.
#[derive(Debug, Default)]
pub struct InterningKeyGenerator {
    ids: HashMap<String, u32>,
    next_id: u32,
}

impl InterningKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, value: &str) -> u32 {
        if let Some(id) = self.ids.get(value) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(value.to_string(), id);
        id
    }
}

impl SchedulingKeyGenerator for InterningKeyGenerator {
    fn key(
        &mut self,
        node_selector: &NodeSelector,
        affinity: &Affinity,
        tolerations: &[Toleration],
        requests: &ResourceVector,
        priority: i32,
    ) -> SchedulingKey {
        let mut hasher = DefaultHasher::new();

        let mut selector_ids: Vec<(u32, u32)> = node_selector
            .iter()
            .map(|(k, v)| (self.intern(k), self.intern(v)))
            .collect();
        selector_ids.sort_unstable();
        selector_ids.hash(&mut hasher);

        let mut required_ids: Vec<u32> = affinity.required.iter().map(|s| self.intern(s)).collect();
        required_ids.sort_unstable();
        required_ids.hash(&mut hasher);

        let mut preferred_ids: Vec<u32> =
            affinity.preferred.iter().map(|s| self.intern(s)).collect();
        preferred_ids.sort_unstable();
        preferred_ids.hash(&mut hasher);

        let mut toleration_ids: Vec<(u32, u32, u32, u32)> = tolerations
            .iter()
            .map(|t| {
                (
                    self.intern(&t.key),
                    self.intern(&t.operator),
                    self.intern(&t.value),
                    self.intern(&t.effect),
                )
            })
            .collect();
        toleration_ids.sort_unstable();
        toleration_ids.hash(&mut hasher);

        requests.compact_string().hash(&mut hasher);
        priority.hash(&mut hasher);

        SchedulingKey(hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(pairs: &[(&str, &str)]) -> NodeSelector {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn identical_inputs_produce_equal_keys() {
        let mut gen = InterningKeyGenerator::new();
        let sel = selector(&[("zone", "us-east")]);
        let affinity = Affinity::default();
        let requests = ResourceVector::from_pairs([("cpu", 2.0)]);

        let k1 = gen.key(&sel, &affinity, &[], &requests, 5);
        let k2 = gen.key(&sel, &affinity, &[], &requests, 5);
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_priority_produces_different_key() {
        let mut gen = InterningKeyGenerator::new();
        let sel = selector(&[("zone", "us-east")]);
        let affinity = Affinity::default();
        let requests = ResourceVector::from_pairs([("cpu", 2.0)]);

        let k1 = gen.key(&sel, &affinity, &[], &requests, 5);
        let k2 = gen.key(&sel, &affinity, &[], &requests, 6);
        assert_ne!(k1, k2);
    }

    #[test]
    fn selector_order_does_not_affect_key() {
        let mut gen = InterningKeyGenerator::new();
        let sel_a = selector(&[("zone", "us-east"), ("disk", "ssd")]);
        let sel_b = selector(&[("disk", "ssd"), ("zone", "us-east")]);
        let affinity = Affinity::default();
        let requests = ResourceVector::new();

        let k1 = gen.key(&sel_a, &affinity, &[], &requests, 0);
        let k2 = gen.key(&sel_b, &affinity, &[], &requests, 0);
        assert_eq!(k1, k2);
    }
}
