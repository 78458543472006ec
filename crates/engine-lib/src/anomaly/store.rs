//! Keyed ownership of model state
//!
//! Each (model kind, metric key) pair owns one model behind its own mutex.
//! Evaluations for the same key serialise on that mutex; different keys only
//! share the map's shard locks, which are never held while a model is locked.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DetectionModel, ModelKey, ModelKind, ModelScope, ModelStats};

type SharedModel = Arc<Mutex<Box<dyn DetectionModel>>>;

/// Registry of live model state, created lazily per key
#[derive(Default)]
pub struct ModelStore {
    models: DashMap<ModelKey, SharedModel>,
}

/// Diagnostics for every model held by a store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelStoreStats {
    pub total_models: usize,
    /// model kind -> metric key -> stats
    pub models: BTreeMap<String, BTreeMap<String, ModelStats>>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create<F>(&self, key: &ModelKey, init: F) -> SharedModel
    where
        F: FnOnce() -> Box<dyn DetectionModel>,
    {
        if let Some(model) = self.models.get(key) {
            return Arc::clone(model.value());
        }
        let entry = self.models.entry(key.clone()).or_insert_with(|| {
            debug!(model = %key, "Creating model state");
            Arc::new(Mutex::new(init()))
        });
        Arc::clone(entry.value())
    }

    /// Run `f` with exclusive access to the model for `key`
    ///
    /// The model is built with `init` if the key has no state yet.
    pub fn with_model<F, I, R>(&self, key: &ModelKey, init: I, f: F) -> R
    where
        I: FnOnce() -> Box<dyn DetectionModel>,
        F: FnOnce(&mut dyn DetectionModel) -> R,
    {
        let shared = self.get_or_create(key, init);
        let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut **guard)
    }

    /// Clear state for every model within `scope`, returning how many were cleared
    ///
    /// Fatigue entries are keyed by client-supplied pattern names, so they are
    /// dropped from the store rather than kept as empty state.
    pub fn reset(&self, scope: ModelScope) -> usize {
        let targets: Vec<(ModelKey, SharedModel)> = self
            .models
            .iter()
            .filter(|entry| scope.includes(entry.key().kind))
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (key, model) in &targets {
            if key.kind == ModelKind::Fatigue {
                self.models.remove(key);
                continue;
            }
            model
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .reset();
        }
        targets.len()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Stats for a single key, if it has state
    pub fn stats_for(&self, key: &ModelKey) -> Option<ModelStats> {
        let shared = self.models.get(key).map(|m| Arc::clone(m.value()))?;
        let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
        Some(guard.stats())
    }

    pub fn stats(&self) -> ModelStoreStats {
        let snapshot: Vec<(ModelKey, SharedModel)> = self
            .models
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut models: BTreeMap<String, BTreeMap<String, ModelStats>> = ModelKind::ALL
            .iter()
            .map(|k| (k.as_str().to_string(), BTreeMap::new()))
            .collect();

        for (key, shared) in &snapshot {
            let stats = shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stats();
            models
                .entry(key.kind.as_str().to_string())
                .or_default()
                .insert(key.metric.clone(), stats);
        }

        ModelStoreStats {
            total_models: snapshot.len(),
            models,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{FatigueModel, StatisticalModel, TrendModel};
    use chrono::Utc;

    fn statistical() -> Box<dyn DetectionModel> {
        Box::new(StatisticalModel::new(10))
    }

    #[test]
    fn test_lazy_creation_and_reuse() {
        let store = ModelStore::new();
        let key = ModelKey::new(ModelKind::Statistical, "cost_per_post");
        assert!(store.is_empty());

        store.with_model(&key, statistical, |m| m.add_sample(1.0, Utc::now()));
        store.with_model(&key, statistical, |m| m.add_sample(2.0, Utc::now()));

        assert_eq!(store.len(), 1);
        assert_eq!(store.stats_for(&key).unwrap().sample_count, 2);
    }

    #[test]
    fn test_reset_by_kind() {
        let store = ModelStore::new();
        let stat_key = ModelKey::new(ModelKind::Statistical, "m");
        let trend_key = ModelKey::new(ModelKind::Trend, "m");

        store.with_model(&stat_key, statistical, |m| m.add_sample(1.0, Utc::now()));
        store.with_model(&trend_key, || Box::new(TrendModel::new()), |m| {
            m.add_sample(1.0, Utc::now())
        });

        let cleared = store.reset(ModelScope::Kind(ModelKind::Trend));
        assert_eq!(cleared, 1);
        assert_eq!(store.stats_for(&trend_key).unwrap().sample_count, 0);
        assert_eq!(store.stats_for(&stat_key).unwrap().sample_count, 1);

        assert_eq!(store.reset(ModelScope::All), 2);
        assert_eq!(store.stats_for(&stat_key).unwrap().sample_count, 0);
    }

    #[test]
    fn test_reset_drops_fatigue_entries() {
        let store = ModelStore::new();
        let stat_key = ModelKey::new(ModelKind::Statistical, "m");
        store.with_model(&stat_key, statistical, |m| m.add_sample(1.0, Utc::now()));
        for pattern in ["a", "b", "c"] {
            store.with_model(
                &ModelKey::new(ModelKind::Fatigue, pattern),
                || Box::new(FatigueModel::default()),
                |m| m.add_sample(1.0, Utc::now()),
            );
        }
        assert_eq!(store.len(), 4);

        assert_eq!(store.reset(ModelScope::Kind(ModelKind::Fatigue)), 3);
        assert_eq!(store.len(), 1);
        assert!(store.stats().models["fatigue"].is_empty());
        assert_eq!(store.stats_for(&stat_key).unwrap().sample_count, 1);
    }

    #[test]
    fn test_stats_grouped_by_kind() {
        let store = ModelStore::new();
        store.with_model(
            &ModelKey::new(ModelKind::Statistical, "a"),
            statistical,
            |m| m.add_sample(1.0, Utc::now()),
        );

        let stats = store.stats();
        assert_eq!(stats.total_models, 1);
        assert!(stats.models["statistical"].contains_key("a"));
        assert!(stats.models["fatigue"].is_empty());
    }
}
