use std::collections::HashSet;

/// Set payload — unique members, unordered.
#[derive(Debug, Clone, Default)]
pub struct SetValue {
    data: HashSet<Vec<u8>>,
}

impl SetValue {
    pub fn new() -> Self {
        SetValue {
            data: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Add a member. Returns true if the member was new.
    pub fn add(&mut self, member: Vec<u8>) -> bool {
        self.data.insert(member)
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.data.remove(member)
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.data.contains(member)
    }

    pub fn members(&self) -> Vec<&Vec<u8>> {
        self.data.iter().collect()
    }

    pub fn union(&self, other: &SetValue) -> SetValue {
        SetValue {
            data: self.data.union(&other.data).cloned().collect(),
        }
    }

    pub fn intersect(&self, other: &SetValue) -> SetValue {
        SetValue {
            data: self.data.intersection(&other.data).cloned().collect(),
        }
    }

    pub fn difference(&self, other: &SetValue) -> SetValue {
        SetValue {
            data: self.data.difference(&other.data).cloned().collect(),
        }
    }

    /// Remove and return one member chosen uniformly at random.
    pub fn pop_random(&mut self) -> Option<Vec<u8>> {
        use rand::seq::IteratorRandom;
        let mut rng = rand::thread_rng();
        let member = self.data.iter().choose(&mut rng)?.clone();
        self.data.remove(&member);
        Some(member)
    }

    /// Remove and return up to `count` distinct members, uniformly at
    /// random. `count` is clamped at the cardinality.
    pub fn pop_random_many(&mut self, count: usize) -> Vec<Vec<u8>> {
        use rand::seq::IteratorRandom;
        let mut rng = rand::thread_rng();
        let count = count.min(self.data.len());
        let chosen: Vec<Vec<u8>> = self
            .data
            .iter()
            .choose_multiple(&mut rng, count)
            .into_iter()
            .cloned()
            .collect();
        for member in &chosen {
            self.data.remove(member);
        }
        chosen
    }

    /// Random members without removal. A positive count yields distinct
    /// members clamped at the cardinality; a negative count permits
    /// duplicates and always yields `-count` members.
    pub fn random_members(&self, count: i64) -> Vec<Vec<u8>> {
        use rand::seq::IteratorRandom;
        let mut rng = rand::thread_rng();

        if count >= 0 {
            let count = (count as usize).min(self.data.len());
            self.data
                .iter()
                .choose_multiple(&mut rng, count)
                .into_iter()
                .cloned()
                .collect()
        } else {
            let count = count.unsigned_abs() as usize;
            let members: Vec<&Vec<u8>> = self.data.iter().collect();
            if members.is_empty() {
                return vec![];
            }
            (0..count)
                .map(|_| {
                    use rand::Rng;
                    let idx = rng.gen_range(0..members.len());
                    members[idx].clone()
                })
                .collect()
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.data.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(members: &[&str]) -> SetValue {
        let mut set = SetValue::new();
        for m in members {
            set.add(m.as_bytes().to_vec());
        }
        set
    }

    #[test]
    fn test_add_remove() {
        let mut set = SetValue::new();
        assert!(set.add(b"a".to_vec()));
        assert!(!set.add(b"a".to_vec()));
        assert!(set.remove(b"a"));
        assert!(!set.remove(b"a"));
    }

    #[test]
    fn test_algebra() {
        let a = set_of(&["1", "2", "3"]);
        let b = set_of(&["2", "3", "4"]);
        assert_eq!(a.union(&b).len(), 4);
        assert_eq!(a.intersect(&b).len(), 2);
        assert_eq!(a.difference(&b).len(), 1);
        assert!(a.difference(&b).contains(b"1"));
    }

    #[test]
    fn test_pop_random_drains() {
        let mut set = set_of(&["a", "b", "c"]);
        let mut popped = Vec::new();
        while let Some(m) = set.pop_random() {
            popped.push(m);
        }
        assert_eq!(popped.len(), 3);
        popped.sort();
        popped.dedup();
        assert_eq!(popped.len(), 3);
    }

    #[test]
    fn test_pop_random_many_clamps() {
        let mut set = set_of(&["a", "b"]);
        let popped = set.pop_random_many(10);
        assert_eq!(popped.len(), 2);
        assert!(set.is_empty());
    }

    #[test]
    fn test_random_members_positive_distinct() {
        let set = set_of(&["a", "b", "c"]);
        let members = set.random_members(10);
        assert_eq!(members.len(), 3);
        let mut sorted = members.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn test_random_members_negative_allows_duplicates() {
        let set = set_of(&["only"]);
        let members = set.random_members(-5);
        assert_eq!(members.len(), 5);
        assert!(members.iter().all(|m| m == b"only"));
    }
}
