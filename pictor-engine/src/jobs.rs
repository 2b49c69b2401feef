//! Storage and lookup of in-flight jobs.

use crate::request::RequestKey;
use std::collections::HashMap;
use std::fmt;

/// Generational index of an engine job.
///
/// A slot is reused once its job is released, with a bumped generation, so
/// late messages about the old job never reach the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId {
    index: u32,
    generation: u32,
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job{}v{}", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Free { generation: u32, next_free: Option<u32> },
}

/// Free-list arena of jobs.
pub(crate) struct JobArena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> JobArena<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free_head: None, len: 0 }
    }

    pub fn insert_with(&mut self, build: impl FnOnce(JobId) -> T) -> JobId {
        self.len += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match slot {
                Slot::Free { generation, next_free } => (generation.wrapping_add(1), *next_free),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            let id = JobId { index, generation };
            *slot = Slot::Occupied { generation, value: build(id) };
            self.free_head = next_free;
            return id;
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        let id = JobId { index, generation: 0 };
        self.slots.push(Slot::Occupied { generation: 0, value: build(id) });
        id
    }

    pub fn get(&self, id: JobId) -> Option<&T> {
        match self.slots.get(id.index as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut T> {
        match self.slots.get_mut(id.index as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn remove(&mut self, id: JobId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {}
            _ => return None,
        }
        let freed = Slot::Free { generation: id.generation, next_free: self.free_head };
        let Slot::Occupied { value, .. } = std::mem::replace(slot, freed) else {
            return None;
        };
        self.free_head = Some(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, .. } => {
                    Some(JobId { index: index as u32, generation: *generation })
                }
                Slot::Free { .. } => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

/// In-flight jobs by request key.
///
/// Cache-only jobs live in their own map: a request that may only be served
/// from cache never joins a job that fetches from the source, and the
/// reverse.
#[derive(Default)]
pub(crate) struct Jobs {
    jobs: HashMap<RequestKey, JobId>,
    cache_only_jobs: HashMap<RequestKey, JobId>,
}

impl Jobs {
    pub fn get(&self, key: &RequestKey, only_retrieve_from_cache: bool) -> Option<JobId> {
        self.map(only_retrieve_from_cache).get(key).copied()
    }

    pub fn put(&mut self, key: RequestKey, job: JobId, only_retrieve_from_cache: bool) {
        self.map_mut(only_retrieve_from_cache).insert(key, job);
    }

    /// Remove `key` only if it still maps to `job`.
    pub fn remove_if_current(&mut self, key: &RequestKey, job: JobId, only_retrieve_from_cache: bool) {
        let map = self.map_mut(only_retrieve_from_cache);
        if map.get(key) == Some(&job) {
            map.remove(key);
        }
    }

    pub fn keys(&self) -> Vec<RequestKey> {
        self.jobs.keys().chain(self.cache_only_jobs.keys()).cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.jobs.len() + self.cache_only_jobs.len()
    }

    fn map(&self, only_retrieve_from_cache: bool) -> &HashMap<RequestKey, JobId> {
        if only_retrieve_from_cache {
            &self.cache_only_jobs
        } else {
            &self.jobs
        }
    }

    fn map_mut(&mut self, only_retrieve_from_cache: bool) -> &mut HashMap<RequestKey, JobId> {
        if only_retrieve_from_cache {
            &mut self.cache_only_jobs
        } else {
            &mut self.jobs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::tests::key;

    #[test]
    fn test_arena_reuses_slots_with_new_generation() {
        let mut arena = JobArena::new();
        let first = arena.insert_with(|_| "first");
        assert_eq!(arena.remove(first), Some("first"));
        let second = arena.insert_with(|_| "second");
        assert_ne!(first, second);
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second), Some(&"second"));
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_arena_passes_id_to_builder() {
        let mut arena = JobArena::new();
        let id = arena.insert_with(|id| id);
        assert_eq!(arena.get(id), Some(&id));
        assert_eq!(arena.ids(), vec![id]);
    }

    #[test]
    fn test_cache_only_jobs_are_separate() {
        let mut arena = JobArena::new();
        let full = arena.insert_with(|_| ());
        let cache_only = arena.insert_with(|_| ());
        let mut jobs = Jobs::default();
        jobs.put(key("a"), full, false);
        assert_eq!(jobs.get(&key("a"), true), None);
        jobs.put(key("a"), cache_only, true);
        assert_eq!(jobs.get(&key("a"), false), Some(full));
        assert_eq!(jobs.get(&key("a"), true), Some(cache_only));
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_remove_if_current_ignores_stale_job() {
        let mut arena = JobArena::new();
        let stale = arena.insert_with(|_| ());
        let current = arena.insert_with(|_| ());
        let mut jobs = Jobs::default();
        jobs.put(key("a"), current, false);
        jobs.remove_if_current(&key("a"), stale, false);
        assert_eq!(jobs.get(&key("a"), false), Some(current));
        jobs.remove_if_current(&key("a"), current, false);
        assert_eq!(jobs.get(&key("a"), false), None);
    }
}
