//! Service and worker tables owned by the broker.
//!
//! Workers are keyed by identity (hex of their routing frame) and services
//! by name. Cross references are keys, never pointers: a service's idle
//! queue holds worker identities, a worker holds its service name. Removing
//! a worker is a single [`Registry::purge`] that clears every table it
//! appears in.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::message::Multipart;

/// A registered worker.
pub(crate) struct Worker<M: Multipart> {
    /// Routing frame used to reach the worker.
    address: M::Frame,
    /// Service the worker registered for.
    service: String,
    /// Moment after which the worker is considered dead.
    expiry: Instant,
    /// A request has been handed out and no reply has come back yet.
    busy: bool,
}

impl<M: Multipart> Worker<M> {
    pub(crate) fn service(&self) -> &str {
        &self.service
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy
    }

    pub(crate) fn address(&self) -> &[u8] {
        &*self.address
    }
}

/// Per-service queues.
struct Service<M: Multipart> {
    /// Requests waiting for a worker, each wrapped with the client address.
    pending: VecDeque<M>,
    /// Idle worker identities, oldest first.
    idle: VecDeque<String>,
    /// Registered workers, idle or busy.
    workers: usize,
}

impl<M: Multipart> Default for Service<M> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            idle: VecDeque::new(),
            workers: 0,
        }
    }
}

pub(crate) struct Registry<M: Multipart> {
    workers: HashMap<String, Worker<M>>,
    services: HashMap<String, Service<M>>,
    /// Every idle worker across all services, oldest first.
    waiting: VecDeque<String>,
}

impl<M: Multipart> Registry<M> {
    pub(crate) fn new() -> Self {
        Self {
            workers: HashMap::new(),
            services: HashMap::new(),
            waiting: VecDeque::new(),
        }
    }

    pub(crate) fn worker(&self, identity: &str) -> Option<&Worker<M>> {
        self.workers.get(identity)
    }

    /// Add a worker for `service`, creating the service on first use.
    ///
    /// The worker starts busy; call [`Registry::release`] to queue it.
    pub(crate) fn register(
        &mut self,
        identity: String,
        address: M::Frame,
        service: String,
        expiry: Instant,
    ) {
        self.services.entry(service.clone()).or_default().workers += 1;
        self.workers.insert(
            identity,
            Worker {
                address,
                service,
                expiry,
                busy: true,
            },
        );
    }

    /// Put a worker at the back of its service's idle queue.
    pub(crate) fn release(&mut self, identity: &str, expiry: Instant) {
        let Some(worker) = self.workers.get_mut(identity) else {
            return;
        };
        worker.expiry = expiry;
        if !worker.busy {
            return;
        }
        worker.busy = false;
        if let Some(service) = self.services.get_mut(&worker.service) {
            service.idle.push_back(identity.to_string());
        }
        self.waiting.push_back(identity.to_string());
    }

    /// Push back a worker's expiry. Returns false for unknown identities.
    pub(crate) fn refresh(&mut self, identity: &str, expiry: Instant) -> bool {
        match self.workers.get_mut(identity) {
            Some(worker) => {
                worker.expiry = expiry;
                true
            }
            None => false,
        }
    }

    /// Remove a worker from every table.
    pub(crate) fn purge(&mut self, identity: &str) -> Option<Worker<M>> {
        let worker = self.workers.remove(identity)?;
        if let Some(service) = self.services.get_mut(&worker.service) {
            service.idle.retain(|id| id != identity);
            service.workers = service.workers.saturating_sub(1);
        }
        self.waiting.retain(|id| id != identity);
        Some(worker)
    }

    /// Queue a request for `service`, creating the service on first use.
    pub(crate) fn enqueue(&mut self, service: &str, request: M) {
        match self.services.get_mut(service) {
            Some(entry) => entry.pending.push_back(request),
            None => {
                let mut entry = Service::default();
                entry.pending.push_back(request);
                self.services.insert(service.to_string(), entry);
            }
        }
    }

    /// Pair the oldest idle worker of `service` with its oldest request.
    ///
    /// The worker leaves the idle queues and is marked busy. Returns a copy
    /// of its routing frame and the request.
    pub(crate) fn assign(&mut self, service: &str) -> Option<(M::Frame, M)> {
        let entry = self.services.get_mut(service)?;
        if entry.pending.is_empty() {
            return None;
        }
        let identity = entry.idle.pop_front()?;
        let request = entry.pending.pop_front()?;
        self.waiting.retain(|id| *id != identity);

        let worker = self.workers.get_mut(&identity)?;
        worker.busy = true;
        Some((M::frame(&*worker.address), request))
    }

    /// Identities of idle workers whose expiry is before `now`.
    ///
    /// Limited to `service` when given.
    pub(crate) fn expired(&self, service: Option<&str>, now: Instant) -> Vec<String> {
        let candidates = match service {
            Some(name) => match self.services.get(name) {
                Some(entry) => &entry.idle,
                None => return Vec::new(),
            },
            None => &self.waiting,
        };
        candidates
            .iter()
            .filter(|id| self.workers.get(*id).is_some_and(|w| w.expiry < now))
            .cloned()
            .collect()
    }

    /// Routing frames of every idle worker, oldest first.
    pub(crate) fn idle_addresses(&self) -> Vec<M::Frame> {
        self.waiting
            .iter()
            .filter_map(|id| self.workers.get(id))
            .map(|worker| M::frame(&*worker.address))
            .collect()
    }

    pub(crate) fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn worker_count(&self, service: &str) -> usize {
        self.services.get(service).map_or(0, |s| s.workers)
    }

    pub(crate) fn idle_count(&self, service: &str) -> usize {
        self.services.get(service).map_or(0, |s| s.idle.len())
    }

    pub(crate) fn pending_count(&self, service: &str) -> usize {
        self.services.get(service).map_or(0, |s| s.pending.len())
    }

    pub(crate) fn waiting_count(&self) -> usize {
        self.waiting.len()
    }
}
