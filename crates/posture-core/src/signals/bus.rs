use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EvalScope, Signal};
use crate::evaluators::EvalError;
use crate::taxonomy::ControlDefinition;

/// Source of raw signals. Implemented outside the core.
#[async_trait]
pub trait SignalCollector: Send + Sync {
    async fn collect(&self, signal_id: &str, scope: &EvalScope) -> Signal;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub published: u64,
    /// Publishes ignored because a newer signal was already held.
    pub superseded: u64,
}

/// Per-run signal registry for one scope.
///
/// Holds the most recently collected signal per id. Writable only during
/// acquisition; [`SignalBus::freeze`] ends the write phase.
#[derive(Debug)]
pub struct SignalBus {
    scope: EvalScope,
    scope_key: String,
    freshness: Option<Duration>,
    cache: BTreeMap<String, Signal>,
    stats: CacheStats,
}

impl SignalBus {
    pub fn new(scope: EvalScope) -> Self {
        let scope_key = scope.key();
        Self {
            scope,
            scope_key,
            freshness: None,
            cache: BTreeMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Cached signals older than `window` are collected again by [`acquire`](Self::acquire).
    pub fn with_freshness(mut self, window: Duration) -> Self {
        self.freshness = Some(window);
        self
    }

    pub fn scope(&self) -> &EvalScope {
        &self.scope
    }

    /// Cache key of a signal within this bus, `signal_id:scope_key`.
    pub fn cache_key(&self, signal_id: &str) -> String {
        format!("{signal_id}:{}", self.scope_key)
    }

    /// Store `signal` unless a more recently collected one is already held.
    pub fn publish(&mut self, signal: Signal) -> bool {
        if let Some(existing) = self.cache.get(&signal.id) {
            if existing.collected_at > signal.collected_at {
                self.stats.superseded += 1;
                return false;
            }
        }
        self.stats.published += 1;
        self.cache.insert(signal.id.clone(), signal);
        true
    }

    pub fn get(&self, signal_id: &str) -> Option<&Signal> {
        self.cache.get(signal_id)
    }

    fn is_fresh(&self, signal: &Signal, now: DateTime<Utc>) -> bool {
        match self.freshness {
            Some(window) => now - signal.collected_at <= window,
            None => true,
        }
    }

    /// Pull every listed signal through `collector`, reusing fresh cache entries.
    pub async fn acquire(
        &mut self,
        collector: &dyn SignalCollector,
        signal_ids: &[&str],
        now: DateTime<Utc>,
    ) {
        let wanted: BTreeSet<&str> = signal_ids.iter().copied().collect();
        for id in wanted {
            if let Some(cached) = self.cache.get(id) {
                if self.is_fresh(cached, now) {
                    self.stats.hits += 1;
                    debug!(cache_key = %self.cache_key(id), "signal cache hit");
                    continue;
                }
            }
            self.stats.misses += 1;
            let mut signal = collector.collect(id, &self.scope).await;
            if signal.id != id {
                debug!(requested = %id, returned = %signal.id, "collector returned foreign signal id");
                signal.id = id.to_string();
            }
            self.publish(signal);
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// End the write phase.
    pub fn freeze(self) -> SignalSnapshot {
        SignalSnapshot {
            scope_key: self.scope_key,
            scope: self.scope,
            signals: self.cache,
            stats: self.stats,
        }
    }
}

/// Immutable signal set shared by all evaluators of a run.
#[derive(Debug, Clone)]
pub struct SignalSnapshot {
    scope: EvalScope,
    scope_key: String,
    signals: BTreeMap<String, Signal>,
    stats: CacheStats,
}

impl SignalSnapshot {
    pub fn get(&self, signal_id: &str) -> Option<&Signal> {
        self.signals.get(signal_id)
    }

    pub fn scope(&self) -> &EvalScope {
        &self.scope
    }

    pub fn scope_key(&self) -> &str {
        &self.scope_key
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.values()
    }

    /// Read access restricted to the signals `control` declares.
    pub fn view<'a>(&'a self, control: &'a ControlDefinition) -> SignalView<'a> {
        SignalView {
            allowed: &control.required_signals,
            snapshot: self,
        }
    }
}

/// What an evaluator may see.
#[derive(Debug, Clone, Copy)]
pub struct SignalView<'a> {
    allowed: &'a [String],
    snapshot: &'a SignalSnapshot,
}

impl<'a> SignalView<'a> {
    /// The signal, if the control declared it and it was collected.
    pub fn get(&self, signal_id: &str) -> Option<&'a Signal> {
        if self.allowed.iter().any(|s| s == signal_id) {
            self.snapshot.get(signal_id)
        } else {
            None
        }
    }

    /// A declared, successfully collected signal.
    pub fn require(&self, signal_id: &str) -> Result<&'a Signal, EvalError> {
        match self.get(signal_id) {
            Some(s) if s.is_ok() => Ok(s),
            Some(s) => Err(EvalError::MissingData {
                detail: format!(
                    "signal {signal_id} is {:?}: {}",
                    s.status,
                    s.error.as_deref().unwrap_or("no detail")
                ),
            }),
            None => Err(EvalError::MissingData {
                detail: format!("signal {signal_id} is not visible"),
            }),
        }
    }

    /// Object payload of a required signal.
    pub fn payload(&self, signal_id: &str) -> Result<&'a serde_json::Value, EvalError> {
        self.require(signal_id)?
            .payload()
            .ok_or_else(|| EvalError::MissingData {
                detail: format!("signal {signal_id} has no payload"),
            })
    }

    pub fn scope(&self) -> &'a EvalScope {
        self.snapshot.scope()
    }
}
