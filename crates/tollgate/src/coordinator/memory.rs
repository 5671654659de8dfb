// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::{CoordinatorError, SharedCoordinator, WindowDecision, WindowRequest};
use crate::clock::millis;

#[derive(Debug)]
enum Value {
    Text(String),
    Counter(i64),
    Window(Vec<(u64, String)>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Coordination store held in process memory.
///
/// Suitable for tests and single-process deployments; every governor sharing the
/// same instance (it is a cheap clone) sees the same breaker and rate state.
/// Expiry follows the tokio clock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCoordinator {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryCoordinator {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|entry| entry.expires_at > now).count()
    }

    /// Returns `true` when no live key exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_live<R>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> R) -> R {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(key);
        }
        f(&mut entries, now)
    }
}

impl SharedCoordinator for InMemoryCoordinator {
    async fn get(&self, key: &str) -> Result<Option<String>, CoordinatorError> {
        self.with_live(key, |entries, _| match entries.get(key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text.clone())),
            Some(Value::Counter(count)) => Ok(Some(count.to_string())),
            Some(Value::Window(_)) => Err(CoordinatorError::new(format!("key '{key}' holds a window, not a value"))),
        })
    }

    async fn compare_and_swap(&self, key: &str, expected: Option<&str>, new: &str, ttl: Duration) -> Result<bool, CoordinatorError> {
        self.with_live(key, |entries, now| {
            let current = match entries.get(key).map(|entry| &entry.value) {
                None => None,
                Some(Value::Text(text)) => Some(text.as_str()),
                Some(_) => return Err(CoordinatorError::new(format!("key '{key}' does not hold a text value"))),
            };

            if current != expected {
                return Ok(false);
            }

            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Text(new.to_string()),
                    expires_at: now + ttl,
                },
            );
            Ok(true)
        })
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CoordinatorError> {
        self.with_live(key, |entries, now| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Counter(0),
                expires_at: now + ttl,
            });

            match &mut entry.value {
                Value::Counter(count) => {
                    *count = count.saturating_add(1);
                    Ok(*count)
                }
                _ => Err(CoordinatorError::new(format!("key '{key}' does not hold a counter"))),
            }
        })
    }

    async fn delete(&self, key: &str) -> Result<(), CoordinatorError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn sliding_window_acquire(&self, key: &str, request: WindowRequest<'_>) -> Result<WindowDecision, CoordinatorError> {
        self.with_live(key, |entries, now| {
            let window_millis = millis(request.window);
            let cutoff = request.now_millis.saturating_sub(window_millis);

            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Window(Vec::new()),
                expires_at: now + request.window,
            });

            let Value::Window(members) = &mut entry.value else {
                return Err(CoordinatorError::new(format!("key '{key}' does not hold a window")));
            };

            members.retain(|(score, _)| *score > cutoff);

            if members.len() < usize::try_from(request.limit).unwrap_or(usize::MAX) {
                members.push((request.now_millis, request.member.to_string()));
                entry.expires_at = now + request.window;
                return Ok(WindowDecision::Acquired);
            }

            let oldest = members.iter().map(|(score, _)| *score).min().unwrap_or(request.now_millis);
            let retry_after = oldest.saturating_add(window_millis).saturating_sub(request.now_millis).max(1);
            Ok(WindowDecision::Full {
                retry_after: Duration::from_millis(retry_after),
            })
        })
    }

    async fn sliding_window_release(&self, key: &str, member: &str) -> Result<(), CoordinatorError> {
        self.with_live(key, |entries, _| {
            if let Some(Entry {
                value: Value::Window(members),
                ..
            }) = entries.get_mut(key)
            {
                members.retain(|(_, m)| m != member);
            }
            Ok(())
        })
    }
}
