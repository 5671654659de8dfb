// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;

/// Source of uniform random values in `[0, 1)` used to jitter backoff delays.
///
/// The default source is `fastrand`, which is **not** cryptographically secure. Jitter
/// only spreads retries apart, so that is all it needs.
///
/// Tests inject a fixed value or a function to make delays deterministic:
///
/// ```
/// use tollgate::JitterSource;
///
/// let fixed = JitterSource::fixed(0.5);
/// assert!((fixed.next_f64() - 0.5).abs() < f64::EPSILON);
/// ```
#[derive(Clone, Default)]
pub struct JitterSource(Inner);

#[derive(Clone, Default)]
enum Inner {
    #[default]
    Real,
    Function(Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Debug for JitterSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Inner::Real => write!(f, "JitterSource::Real"),
            Inner::Function(_) => write!(f, "JitterSource::Function"),
        }
    }
}

impl JitterSource {
    /// Always yields `value`.
    #[must_use]
    pub fn fixed(value: f64) -> Self {
        Self(Inner::Function(Arc::new(move || value)))
    }

    /// Yields whatever `f` returns.
    #[must_use]
    pub fn function<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self(Inner::Function(Arc::new(f)))
    }

    /// Returns the next value.
    #[must_use]
    pub fn next_f64(&self) -> f64 {
        match &self.0 {
            Inner::Real => fastrand::f64(),
            Inner::Function(generator) => generator(),
        }
    }
}
