use crate::types::{Phase, Request, RequestId, RequestStatus, WorkerId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Request {0} already registered")]
    AlreadyRegistered(RequestId),

    #[error("Request {0} not found")]
    NotFound(RequestId),
}

/// Canonical list of in-flight requests.
///
/// Engines hold requests while working on them, but only the registry deletes one, and it
/// does so exactly once, when the request completes.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    requests: BTreeMap<RequestId, Request>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self { requests: BTreeMap::new() }
    }

    pub fn insert(&mut self, request: Request) -> Result<(), RegistryError> {
        if self.requests.contains_key(&request.id) {
            return Err(RegistryError::AlreadyRegistered(request.id));
        }
        self.requests.insert(request.id, request);
        Ok(())
    }

    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.contains_key(&id)
    }

    /// Advance the coarse phase of a request
    pub fn set_phase(
        &mut self,
        id: RequestId,
        phase: Phase,
        status: RequestStatus,
    ) -> Result<(), RegistryError> {
        let request = self.requests.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        request.phase = phase;
        request.status = status;
        Ok(())
    }

    /// Remove a finished request. Returns `None` if it was already removed.
    pub fn remove(&mut self, id: RequestId) -> Option<Request> {
        self.requests.remove(&id)
    }

    /// Requests assigned to `worker_id`, in id order
    pub fn for_worker(&self, worker_id: WorkerId) -> impl Iterator<Item = &Request> {
        self.requests.values().filter(move |request| request.worker_id == worker_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.requests.values()
    }

    /// Requests not yet routed to an engine
    pub fn queued_ids(&self) -> Vec<RequestId> {
        self.requests.values().filter(|request| request.is_queued()).map(|r| r.id).collect()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestType;
    use simulation_clock::SimTime;

    fn request(id: RequestId, kind: RequestType, worker_id: WorkerId) -> Request {
        Request::new(id, kind, worker_id, SimTime::ZERO)
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut registry = RequestRegistry::new();
        registry.insert(request(1, RequestType::Async, 0)).unwrap();
        assert_eq!(
            registry.insert(request(1, RequestType::Sync, 0)),
            Err(RegistryError::AlreadyRegistered(1))
        );
        assert_eq!(registry.get(1).map(|r| r.kind), Some(RequestType::Async));
    }

    #[test]
    fn test_phase_update() {
        let mut registry = RequestRegistry::new();
        registry.insert(request(1, RequestType::Sync, 0)).unwrap();
        assert_eq!(registry.queued_ids(), vec![1]);

        registry.set_phase(1, Phase::ThreadPool, RequestStatus::Processing).unwrap();
        let stored = registry.get(1).unwrap();
        assert_eq!(stored.phase, Phase::ThreadPool);
        assert_eq!(stored.status, RequestStatus::Processing);
        assert!(registry.queued_ids().is_empty());

        assert_eq!(
            registry.set_phase(9, Phase::EventLoop, RequestStatus::Processing),
            Err(RegistryError::NotFound(9))
        );
    }

    #[test]
    fn test_remove_exactly_once() {
        let mut registry = RequestRegistry::new();
        registry.insert(request(3, RequestType::Async, 1)).unwrap();
        assert!(registry.remove(3).is_some());
        assert!(registry.remove(3).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_for_worker_filters() {
        let mut registry = RequestRegistry::new();
        registry.insert(request(1, RequestType::Async, 0)).unwrap();
        registry.insert(request(2, RequestType::Sync, 1)).unwrap();
        registry.insert(request(3, RequestType::Sync, 0)).unwrap();

        let ids: Vec<_> = registry.for_worker(0).map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(registry.len(), 3);
    }
}
