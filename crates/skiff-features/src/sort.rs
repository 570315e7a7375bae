//! Stable topological sort of resources by requirement/capability
//! matching.
//!
//! Depth-first post-order over the dependency edges: a resource's
//! providers are emitted before the resource itself, ties keep input
//! order, and cycles terminate through the monotonic visited set — a
//! resource re-entered recursively is simply skipped, which leaves cyclic
//! components in a stable order rather than failing.

use std::collections::HashMap;

use crate::resource::Resource;

/// Re-order `resources` so that every resource whose requirement is
/// satisfied by another's capability comes after its provider.
pub fn sort<T: Resource>(resources: Vec<T>) -> Vec<T> {
    // The index borrows the resources, so compute the order in its own
    // scope before reordering by move.
    let order = {
        // Per-namespace capability index over the whole universe:
        // namespace → [(resource index, capability index)].
        let mut index: HashMap<&str, Vec<(usize, usize)>> = HashMap::new();
        for (ri, resource) in resources.iter().enumerate() {
            for (ci, capability) in resource.capabilities().iter().enumerate() {
                index
                    .entry(capability.namespace.as_str())
                    .or_default()
                    .push((ri, ci));
            }
        }

        let mut visited = vec![false; resources.len()];
        let mut order = Vec::with_capacity(resources.len());
        for i in 0..resources.len() {
            visit(i, &resources, &index, &mut visited, &mut order);
        }
        order
    };

    // Reorder by taking elements out in the computed order.
    let mut slots: Vec<Option<T>> = resources.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

fn visit<T: Resource>(
    index_of: usize,
    resources: &[T],
    index: &HashMap<&str, Vec<(usize, usize)>>,
    visited: &mut [bool],
    order: &mut Vec<usize>,
) {
    if visited[index_of] {
        return;
    }
    visited[index_of] = true;

    for requirement in resources[index_of].requirements() {
        let Some(candidates) = index.get(requirement.namespace.as_str()) else {
            continue;
        };
        for &(provider, capability) in candidates {
            if requirement.matches(&resources[provider].capabilities()[capability]) {
                visit(provider, resources, index, visited, order);
            }
        }
    }
    order.push(index_of);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::resource::{Capability, FeatureResource, Requirement};

    fn requires(namespace: &str, filter: &str) -> Requirement {
        Requirement::new(namespace).with_filter(Filter::parse(filter).unwrap())
    }

    fn names(sorted: &[FeatureResource]) -> Vec<&str> {
        sorted.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn provider_precedes_consumer() {
        let a = FeatureResource::new("a").requires(requires("x", "(n=1)"));
        let b = FeatureResource::new("b").provides(Capability::new("x").attribute("n", "1"));
        let c = FeatureResource::new("c").requires(requires("x", "(n=2)"));

        let sorted = sort(vec![a, b, c]);
        assert_eq!(names(&sorted), vec!["b", "a", "c"]);
    }

    #[test]
    fn unrelated_resources_keep_input_order() {
        let resources: Vec<_> = ["one", "two", "three"]
            .iter()
            .map(|n| FeatureResource::new(*n))
            .collect();
        let sorted = sort(resources);
        assert_eq!(names(&sorted), vec!["one", "two", "three"]);
    }

    #[test]
    fn chains_order_transitively() {
        // a -> b -> c (arrow means "requires")
        let a = FeatureResource::new("a").requires(requires("svc", "(id=b)"));
        let b = FeatureResource::new("b")
            .provides(Capability::new("svc").attribute("id", "b"))
            .requires(requires("svc", "(id=c)"));
        let c = FeatureResource::new("c").provides(Capability::new("svc").attribute("id", "c"));

        let sorted = sort(vec![a, b, c]);
        assert_eq!(names(&sorted), vec!["c", "b", "a"]);
    }

    #[test]
    fn filterless_requirement_matches_whole_namespace() {
        let a = FeatureResource::new("a").requires(Requirement::new("x"));
        let b = FeatureResource::new("b").provides(Capability::new("x").attribute("n", "9"));

        let sorted = sort(vec![a, b]);
        assert_eq!(names(&sorted), vec!["b", "a"]);
    }

    #[test]
    fn cycles_are_tolerated() {
        let a = FeatureResource::new("a")
            .provides(Capability::new("x").attribute("id", "a"))
            .requires(requires("x", "(id=b)"));
        let b = FeatureResource::new("b")
            .provides(Capability::new("x").attribute("id", "b"))
            .requires(requires("x", "(id=a)"));
        let c = FeatureResource::new("c").requires(requires("x", "(id=a)"));

        let sorted = sort(vec![a, b, c]);
        // The a/b cycle stays in a stable order; c follows its provider.
        assert_eq!(names(&sorted), vec!["b", "a", "c"]);
    }

    #[test]
    fn self_requirement_is_stable() {
        let a = FeatureResource::new("a")
            .provides(Capability::new("x").attribute("id", "a"))
            .requires(requires("x", "(id=a)"));
        let sorted = sort(vec![a]);
        assert_eq!(names(&sorted), vec!["a"]);
    }

    #[test]
    fn namespace_mismatch_does_not_order() {
        let a = FeatureResource::new("a").requires(requires("other", "(n=1)"));
        let b = FeatureResource::new("b").provides(Capability::new("x").attribute("n", "1"));
        let sorted = sort(vec![a, b]);
        assert_eq!(names(&sorted), vec!["a", "b"]);
    }
}
