//! Parameter snapshot shared between the control thread and rendering notes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::params::VoiceParameterSet;

/// Latest sanitised parameter set plus a generation counter.
///
/// The control thread publishes with [`update`](Self::update). Each note keeps
/// the generation it last loaded and checks it once at the top of a block, so
/// a block never sees two different snapshots.
#[derive(Debug)]
pub struct ParameterStore {
    current: ArcSwap<VoiceParameterSet>,
    generation: AtomicU64,
}

impl ParameterStore {
    pub fn new(params: VoiceParameterSet) -> Self {
        Self {
            current: ArcSwap::from_pointee(params.sanitized()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn shared(params: VoiceParameterSet) -> Arc<Self> {
        Arc::new(Self::new(params))
    }

    /// Sanitise and publish a new snapshot.
    pub fn update(&self, params: VoiceParameterSet) {
        self.current.store(Arc::new(params.sanitized()));
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// The current snapshot.
    #[inline]
    pub fn load(&self) -> Arc<VoiceParameterSet> {
        self.current.load_full()
    }

    /// The snapshot if it changed since `seen`, updating `seen`.
    pub fn load_if_changed(&self, seen: &mut u64) -> Option<Arc<VoiceParameterSet>> {
        let generation = self.generation();
        if generation == *seen {
            return None;
        }
        *seen = generation;
        Some(self.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_tracks_updates() {
        let store = ParameterStore::new(VoiceParameterSet::default());
        let mut seen = store.generation();
        assert!(store.load_if_changed(&mut seen).is_none());

        let mut set = VoiceParameterSet::default();
        set.global.volume = 50.0;
        store.update(set);

        let loaded = store.load_if_changed(&mut seen).expect("update should be visible");
        assert_eq!(loaded.global.volume, 50.0);
        assert!(store.load_if_changed(&mut seen).is_none());
    }

    #[test]
    fn test_update_sanitizes() {
        let store = ParameterStore::new(VoiceParameterSet::default());
        let mut set = VoiceParameterSet::default();
        set.voices[4].unison.size = 0;
        store.update(set);
        assert_eq!(store.load().voices[4].unison.size, 1);
    }

    #[test]
    fn test_update_from_another_thread() {
        let store = ParameterStore::shared(VoiceParameterSet::default());
        let mut seen = store.generation();

        let writer = Arc::clone(&store);
        std::thread::spawn(move || {
            let mut set = VoiceParameterSet::default();
            set.global.bandwidth = 100.0;
            writer.update(set);
        })
        .join()
        .unwrap();

        let loaded = store.load_if_changed(&mut seen).unwrap();
        assert_eq!(loaded.global.bandwidth, 100.0);
    }
}
