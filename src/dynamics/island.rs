//! Island building: union-find over the active bodies, linked by contacts
//! and constraints, producing disjoint groups the solver can run in parallel.

use crate::core::body::BodyId;

/// One island: index ranges into the builder's sorted body/constraint/contact
/// arrays.
#[derive(Debug, Clone, Copy)]
pub struct Island {
    pub bodies: (u32, u32),
    pub constraints: (u32, u32),
    pub contacts: (u32, u32),
}

/// Builds islands for one step. Bodies are addressed by their position in the
/// active-bodies array; static/kinematic bodies never join an island.
pub struct IslandBuilder {
    /// Union-find parent per active body.
    parents: Vec<u32>,
    /// (owning active-body index, constraint index); distributed at finalize.
    constraint_links: Vec<(u32, u32)>,
    contact_links: Vec<(u32, u32)>,

    islands: Vec<Island>,
    sorted_bodies: Vec<BodyId>,
    sorted_constraints: Vec<u32>,
    sorted_contacts: Vec<u32>,
}

impl Default for IslandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IslandBuilder {
    pub fn new() -> Self {
        Self {
            parents: Vec::new(),
            constraint_links: Vec::new(),
            contact_links: Vec::new(),
            islands: Vec::new(),
            sorted_bodies: Vec::new(),
            sorted_constraints: Vec::new(),
            sorted_contacts: Vec::new(),
        }
    }

    /// Starts a step: every active body is its own island.
    pub fn prepare(&mut self, num_active_bodies: usize) {
        self.parents.clear();
        self.parents.extend(0..num_active_bodies as u32);
        self.constraint_links.clear();
        self.contact_links.clear();
        self.islands.clear();
        self.sorted_bodies.clear();
        self.sorted_constraints.clear();
        self.sorted_contacts.clear();
    }

    fn find(&mut self, index: u32) -> u32 {
        let mut root = index;
        while self.parents[root as usize] != root {
            root = self.parents[root as usize];
        }
        // Path compression.
        let mut walk = index;
        while self.parents[walk as usize] != root {
            let next = self.parents[walk as usize];
            self.parents[walk as usize] = root;
            walk = next;
        }
        root
    }

    /// Unions the islands of two active bodies. Pass `None` for bodies that
    /// do not participate (static/kinematic/inactive).
    pub fn link_bodies(&mut self, active_a: Option<u32>, active_b: Option<u32>) {
        if let (Some(a), Some(b)) = (active_a, active_b) {
            let root_a = self.find(a);
            let root_b = self.find(b);
            if root_a != root_b {
                // Deterministic union: the smaller root wins.
                if root_a < root_b {
                    self.parents[root_b as usize] = root_a;
                } else {
                    self.parents[root_a as usize] = root_b;
                }
            }
        }
    }

    /// Registers a non-contact constraint joining two bodies.
    pub fn link_constraint(&mut self, constraint_index: u32, active_a: Option<u32>, active_b: Option<u32>) {
        self.link_bodies(active_a, active_b);
        if let Some(owner) = active_a.or(active_b) {
            self.constraint_links.push((owner, constraint_index));
        }
    }

    /// Registers a contact constraint joining two bodies.
    pub fn link_contact(&mut self, contact_index: u32, active_a: Option<u32>, active_b: Option<u32>) {
        self.link_bodies(active_a, active_b);
        if let Some(owner) = active_a.or(active_b) {
            self.contact_links.push((owner, contact_index));
        }
    }

    /// Compacts the representative set into contiguous islands, largest
    /// first, with deterministically ordered contents.
    pub fn finalize(&mut self, active_bodies: &[BodyId]) {
        let count = self.parents.len();
        debug_assert_eq!(count, active_bodies.len());

        // Map every root to a group slot.
        let mut group_of_body: Vec<u32> = vec![0; count];
        let mut groups: Vec<u32> = Vec::new(); // root per group
        let mut group_sizes: Vec<u32> = Vec::new();
        let mut group_index_of_root: Vec<u32> = vec![u32::MAX; count];

        for index in 0..count as u32 {
            let root = self.find(index);
            let group = if group_index_of_root[root as usize] == u32::MAX {
                let group = groups.len() as u32;
                group_index_of_root[root as usize] = group;
                groups.push(root);
                group_sizes.push(0);
                group
            } else {
                group_index_of_root[root as usize]
            };
            group_of_body[index as usize] = group;
            group_sizes[group as usize] += 1;
        }

        // Number islands in decreasing size so solver threads grab the
        // heaviest work first. Ties break on the group's first body.
        let mut order: Vec<u32> = (0..groups.len() as u32).collect();
        order.sort_unstable_by_key(|&g| (std::cmp::Reverse(group_sizes[g as usize]), groups[g as usize]));
        let mut island_of_group: Vec<u32> = vec![0; groups.len()];
        for (island_index, &group) in order.iter().enumerate() {
            island_of_group[group as usize] = island_index as u32;
        }

        let island_of_active = |active_index: u32| -> usize {
            island_of_group[group_of_body[active_index as usize] as usize] as usize
        };

        let constraint_links = std::mem::take(&mut self.constraint_links);
        let contact_links = std::mem::take(&mut self.contact_links);

        let num_islands = groups.len();
        let mut body_counts = vec![0u32; num_islands];
        for &group in &group_of_body {
            body_counts[island_of_group[group as usize] as usize] += 1;
        }
        let mut constraint_counts = vec![0u32; num_islands];
        for (owner, _) in &constraint_links {
            constraint_counts[island_of_active(*owner)] += 1;
        }
        let mut contact_counts = vec![0u32; num_islands];
        for (owner, _) in &contact_links {
            contact_counts[island_of_active(*owner)] += 1;
        }

        // Prefix sums give each island its ranges.
        let mut body_offset = 0u32;
        let mut constraint_offset = 0u32;
        let mut contact_offset = 0u32;
        self.islands.clear();
        for island in 0..num_islands {
            let island_entry = Island {
                bodies: (body_offset, body_offset + body_counts[island]),
                constraints: (constraint_offset, constraint_offset + constraint_counts[island]),
                contacts: (contact_offset, contact_offset + contact_counts[island]),
            };
            body_offset += body_counts[island];
            constraint_offset += constraint_counts[island];
            contact_offset += contact_counts[island];
            self.islands.push(island_entry);
        }

        // Scatter bodies/constraints/contacts into their ranges, in input
        // order (which is deterministic), then record back-pointers.
        let mut body_cursor: Vec<u32> = self.islands.iter().map(|i| i.bodies.0).collect();
        self.sorted_bodies = vec![BodyId::INVALID; count];
        for (active_index, &id) in active_bodies.iter().enumerate() {
            let island = island_of_group[group_of_body[active_index] as usize] as usize;
            self.sorted_bodies[body_cursor[island] as usize] = id;
            body_cursor[island] += 1;
        }

        let mut constraint_cursor: Vec<u32> = self.islands.iter().map(|i| i.constraints.0).collect();
        self.sorted_constraints = vec![0; constraint_links.len()];
        for (owner, constraint_index) in &constraint_links {
            let island = island_of_active(*owner);
            self.sorted_constraints[constraint_cursor[island] as usize] = *constraint_index;
            constraint_cursor[island] += 1;
        }

        let mut contact_cursor: Vec<u32> = self.islands.iter().map(|i| i.contacts.0).collect();
        self.sorted_contacts = vec![0; contact_links.len()];
        for (owner, contact_index) in &contact_links {
            let island = island_of_active(*owner);
            self.sorted_contacts[contact_cursor[island] as usize] = *contact_index;
            contact_cursor[island] += 1;
        }

        // Store each body's island for O(1) lookup during later passes.
        self.parents.clear();
        for group in group_of_body {
            self.parents.push(island_of_group[group as usize]);
        }
    }

    /// Island index a body was assigned, by its active-array position.
    /// Only valid after [`Self::finalize`].
    pub fn island_of_body(&self, active_index: u32) -> u32 {
        self.parents[active_index as usize]
    }

    pub fn islands(&self) -> &[Island] {
        &self.islands
    }

    pub fn island_bodies(&self, island: &Island) -> &[BodyId] {
        &self.sorted_bodies[island.bodies.0 as usize..island.bodies.1 as usize]
    }

    pub fn island_constraints(&self, island: &Island) -> &[u32] {
        &self.sorted_constraints[island.constraints.0 as usize..island.constraints.1 as usize]
    }

    pub fn island_contacts(&self, island: &Island) -> &[u32] {
        &self.sorted_contacts[island.contacts.0 as usize..island.contacts.1 as usize]
    }

    /// Whether an island has nothing to solve (a lone drifting body).
    pub fn is_singleton(&self, island: &Island) -> bool {
        island.bodies.1 - island.bodies.0 <= 1
            && island.constraints.1 == island.constraints.0
            && island.contacts.1 == island.contacts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(count: u32) -> Vec<BodyId> {
        (0..count).map(|i| BodyId::new(i, 0)).collect()
    }

    #[test]
    fn islands_partition_the_active_bodies() {
        let active = ids(6);
        let mut builder = IslandBuilder::new();
        builder.prepare(active.len());
        // 0-1-2 chained, 3-4 paired, 5 alone.
        builder.link_contact(0, Some(0), Some(1));
        builder.link_contact(1, Some(1), Some(2));
        builder.link_contact(2, Some(3), Some(4));
        builder.finalize(&active);

        let islands = builder.islands().to_vec();
        assert_eq!(islands.len(), 3);

        let mut seen = Vec::new();
        for island in &islands {
            for id in builder.island_bodies(island) {
                assert!(!seen.contains(id), "body {:?} appears in two islands", id);
                seen.push(*id);
            }
        }
        assert_eq!(seen.len(), active.len());
    }

    #[test]
    fn bigger_islands_come_first() {
        let active = ids(6);
        let mut builder = IslandBuilder::new();
        builder.prepare(active.len());
        builder.link_contact(0, Some(4), Some(5));
        builder.link_contact(1, Some(0), Some(1));
        builder.link_contact(2, Some(1), Some(2));
        builder.finalize(&active);

        let islands = builder.islands();
        let size =
            |island: &Island| island.bodies.1 - island.bodies.0;
        assert_eq!(size(&islands[0]), 3);
        assert_eq!(size(&islands[1]), 2);
        assert_eq!(size(&islands[2]), 1);
        assert!(builder.is_singleton(&islands[2]));
    }

    #[test]
    fn contacts_with_static_bodies_stay_in_the_dynamic_body_island() {
        let active = ids(2);
        let mut builder = IslandBuilder::new();
        builder.prepare(active.len());
        // Contact 0 couples body 0 with a static body (None).
        builder.link_contact(0, Some(0), None);
        builder.link_contact(1, Some(0), Some(1));
        builder.finalize(&active);

        assert_eq!(builder.islands().len(), 1);
        assert_eq!(builder.island_contacts(&builder.islands()[0]), &[0, 1]);
    }

    #[test]
    fn island_of_body_matches_the_partition() {
        let active = ids(4);
        let mut builder = IslandBuilder::new();
        builder.prepare(active.len());
        builder.link_contact(0, Some(0), Some(3));
        builder.finalize(&active);

        assert_eq!(builder.island_of_body(0), builder.island_of_body(3));
        assert_ne!(builder.island_of_body(0), builder.island_of_body(1));
    }
}
