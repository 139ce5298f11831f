//! Handler registry: maps each [`Operation`] to the code that executes it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use codehive_core::Operation;
use serde::de::DeserializeOwned;

use crate::task::Payload;

/// Executes one kind of operation. Implemented outside this crate.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn execute(&self, payload: &Payload) -> anyhow::Result<()>;
}

/// A handler that wants a structured payload instead of the raw map.
/// Wrap it in [`Typed`] to register it.
#[async_trait]
pub trait TypedHandler: Send + Sync {
    type Payload: DeserializeOwned + Send;

    async fn handle(&self, payload: Self::Payload) -> anyhow::Result<()>;
}

/// Adapts a [`TypedHandler`]: the payload is decoded at dispatch time and a
/// decode failure fails the task like any other handler error.
pub struct Typed<H>(H);

impl<H: TypedHandler> Typed<H> {
    pub fn new(inner: H) -> Self {
        Self(inner)
    }
}

#[async_trait]
impl<H: TypedHandler> Handler for Typed<H> {
    async fn execute(&self, payload: &Payload) -> anyhow::Result<()> {
        let typed: H::Payload = payload.decode()?;
        self.0.handle(typed).await
    }
}

/// Operation → handler map, safe to share between the worker and whoever
/// registers handlers.
#[derive(Default)]
pub struct Registry {
    handlers: RwLock<HashMap<Operation, Arc<dyn Handler>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `operation`, replacing any previous one.
    pub fn register(&self, operation: Operation, handler: Arc<dyn Handler>) {
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation, handler)
            .is_some();
        if replaced {
            tracing::debug!("🔄 Replaced handler for {operation}");
        } else {
            tracing::debug!("➕ Registered handler for {operation}");
        }
    }

    pub fn handler(&self, operation: Operation) -> Option<Arc<dyn Handler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&operation)
            .cloned()
    }

    pub fn has_handler(&self, operation: Operation) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&operation)
    }

    /// Registered operations, sorted by string code.
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ops.sort_by_key(|op| op.as_str());
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::CommitPayload;
    use std::sync::Mutex;

    struct Named(&'static str, Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl Handler for Named {
        async fn execute(&self, _payload: &Payload) -> anyhow::Result<()> {
            self.1.lock().unwrap().push(self.0);
            Ok(())
        }
    }

    struct Scan(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl TypedHandler for Scan {
        type Payload = CommitPayload;

        async fn handle(&self, payload: CommitPayload) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(payload.commit_sha);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_overwrites() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = Registry::new();
        registry.register(Operation::SyncRepository, Arc::new(Named("old", calls.clone())));
        registry.register(Operation::SyncRepository, Arc::new(Named("new", calls.clone())));

        let handler = registry.handler(Operation::SyncRepository).unwrap();
        handler.execute(&Payload::for_repository(1)).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["new"]);
        assert_eq!(registry.operations().len(), 1);
    }

    #[test]
    fn test_introspection() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = Registry::new();
        registry.register(Operation::SyncRepository, Arc::new(Named("s", calls.clone())));
        registry.register(Operation::CloneRepository, Arc::new(Named("c", calls)));

        assert!(registry.has_handler(Operation::CloneRepository));
        assert!(!registry.has_handler(Operation::DeleteRepository));
        assert!(registry.handler(Operation::ScanCommit).is_none());
        assert_eq!(
            registry.operations(),
            vec![Operation::CloneRepository, Operation::SyncRepository]
        );
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_payload() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = Typed::new(Scan(seen.clone()));

        handler.execute(&Payload::for_commit(1, "abc")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["abc".to_string()]);

        let err = handler.execute(&Payload::for_repository(1)).await.unwrap_err();
        assert!(err.to_string().contains("commit_sha"));
    }
}
