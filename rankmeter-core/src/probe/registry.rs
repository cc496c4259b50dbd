use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Prober;
use crate::error::{MeterError, Result};
use crate::types::CheckKind;

/// Maps each check kind to the adapter that serves it.
#[derive(Clone, Default)]
pub struct ProberRegistry {
    probers: HashMap<CheckKind, Arc<dyn Prober>>,
}

impl fmt::Debug for ProberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.probers.keys().map(CheckKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("ProberRegistry").field("kinds", &kinds).finish()
    }
}

impl ProberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: CheckKind, prober: Arc<dyn Prober>) -> Self {
        self.register(kind, prober);
        self
    }

    pub fn register(&mut self, kind: CheckKind, prober: Arc<dyn Prober>) {
        self.probers.insert(kind, prober);
    }

    pub fn contains(&self, kind: CheckKind) -> bool {
        self.probers.contains_key(&kind)
    }

    pub fn get(&self, kind: CheckKind) -> Result<Arc<dyn Prober>> {
        self.probers.get(&kind).cloned().ok_or_else(|| {
            MeterError::InvalidBatchRequest(format!("no provider is configured for {kind}"))
        })
    }
}
