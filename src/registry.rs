use std::collections::BTreeMap;
use std::sync::Arc;

use crate::orchestrator::{ManagedProtocol, Orchestrator};
use crate::protocol::{Installable, ProtocolKind};

/// Every protocol kind, each behind [`Installable`].
pub struct ProtocolRegistry {
    protocols: BTreeMap<ProtocolKind, Box<dyn Installable>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self {
            protocols: BTreeMap::new(),
        }
    }

    /// Registers all five kinds against one orchestrator.
    pub fn with_orchestrator(orchestrator: Arc<Orchestrator>) -> Self {
        let mut registry = Self::new();
        for kind in ProtocolKind::ALL {
            registry.register(Box::new(ManagedProtocol::new(kind, orchestrator.clone())));
        }
        registry
    }

    pub fn register(&mut self, protocol: Box<dyn Installable>) {
        self.protocols.insert(protocol.kind(), protocol);
    }

    /// Registered kinds are closed over `ProtocolKind`; `None` only for an empty registry.
    pub fn get(&self, kind: ProtocolKind) -> Option<&dyn Installable> {
        self.protocols.get(&kind).map(|p| p.as_ref())
    }

    pub fn list(&self) -> Vec<&dyn Installable> {
        self.protocols.values().map(|p| p.as_ref()).collect()
    }

    pub fn kinds(&self) -> Vec<ProtocolKind> {
        self.protocols.keys().copied().collect()
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
