//! Broker - routes client requests to workers by service name.
//!
//! The [`Broker`] owns one ROUTER socket that clients and workers both
//! talk to, tells them apart by the protocol header, and runs a single
//! threaded loop:
//!
//! 1. Poll until the next heartbeat is due
//! 2. Process at most one message
//! 3. On the heartbeat tick, purge expired idle workers and heartbeat the rest
//!
//! Requests for a service are served oldest first by the worker that has
//! been idle the longest. A worker holds at most one request at a time.
//!
//! # Example
//!
//! ```no_run
//! use majordomo::Broker;
//!
//! fn main() -> majordomo::Result<()> {
//!     let mut broker = Broker::bind("tcp://*:5555")?;
//!     let stop = broker.stop_handle();
//!
//!     // Somewhere else: stop.stop();
//!     # drop(stop);
//!     broker.run()
//! }
//! ```

mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use self::registry::Registry;
use crate::config::{deadline, BrokerConfig};
use crate::error::Result;
use crate::message::Multipart;
use crate::protocol::{
    decode_broker_inbound, decode_service, encode_client_reply, encode_to_worker, is_mmi,
    mmi_status, BrokerInbound, Command, MMI_SERVICE,
};
use crate::transport::{SharedContext, Transport, ZmqSocket};

/// Cloneable handle that asks a running broker to leave its loop.
///
/// The loop notices the request after its current poll returns, so the
/// broker stops within one heartbeat interval.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request the loop to exit.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Builder for a broker listening on a libzmq ROUTER socket.
#[derive(Default)]
pub struct BrokerBuilder {
    config: BrokerConfig,
    context: Option<zmq::Context>,
}

impl BrokerBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Interval between heartbeats sent to idle workers.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Heartbeat intervals a worker may stay silent before it is purged.
    pub fn heartbeat_liveness(mut self, liveness: usize) -> Self {
        self.config.heartbeat_liveness = liveness;
        self
    }

    /// Share a caller-owned context. The broker never terminates it.
    pub fn context(mut self, context: &zmq::Context) -> Self {
        self.context = Some(context.clone());
        self
    }

    /// Bind the ROUTER socket and build the broker.
    pub fn bind(self, endpoint: &str) -> Result<Broker<ZmqSocket>> {
        let context = match &self.context {
            Some(context) => SharedContext::borrowed(context),
            None => SharedContext::new(),
        };
        let socket = ZmqSocket::bind(context, zmq::ROUTER, endpoint)?;
        info!(endpoint, "Broker bound");
        Ok(Broker::with_transport(socket, self.config))
    }
}

/// Majordomo broker over any [`Transport`].
pub struct Broker<T: Transport = ZmqSocket> {
    transport: T,
    registry: Registry<T::Message>,
    config: BrokerConfig,
    heartbeat_at: Instant,
    stop: StopHandle,
    closed: bool,
}

impl Broker<ZmqSocket> {
    /// Start configuring a broker.
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// Bind a broker with default configuration and its own context.
    pub fn bind(endpoint: &str) -> Result<Self> {
        BrokerBuilder::new().bind(endpoint)
    }
}

impl<T: Transport> Broker<T> {
    /// Create a broker on an already bound transport.
    pub fn with_transport(transport: T, config: BrokerConfig) -> Self {
        Self {
            transport,
            registry: Registry::new(),
            heartbeat_at: deadline(Instant::now(), config.heartbeat_interval),
            config,
            stop: StopHandle::default(),
            closed: false,
        }
    }

    /// Broker configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Handle that stops [`Broker::run`] from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ask the loop to exit after the current heartbeat tick.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Run the event loop until stopped or a fatal transport fault.
    ///
    /// The transport is released when the loop ends either way.
    pub fn run(&mut self) -> Result<()> {
        info!(
            heartbeat_interval_ms = self.config.heartbeat_interval.as_millis() as u64,
            heartbeat_liveness = self.config.heartbeat_liveness,
            "Broker running"
        );
        let result = self.event_loop();
        if let Err(e) = &result {
            error!(error = %e, "Broker loop terminated");
        }
        let closed = self.shutdown();
        result.and(closed)
    }

    fn event_loop(&mut self) -> Result<()> {
        self.heartbeat_at = deadline(Instant::now(), self.config.heartbeat_interval);

        while !self.stop.is_stopped() {
            let timeout = self.heartbeat_at.saturating_duration_since(Instant::now());
            match self.transport.poll(timeout) {
                Ok(true) => match self.transport.recv() {
                    Ok(msg) => self.process(msg),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!(error = %e, "Receive failed"),
                },
                Ok(false) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, "Poll failed"),
            }

            let now = Instant::now();
            if now >= self.heartbeat_at {
                self.heartbeat_tick(now);
                self.heartbeat_at = deadline(now, self.config.heartbeat_interval);
            }
        }

        info!("Broker stopped");
        Ok(())
    }

    /// Close the transport. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Broker shutting down");
        self.transport.close()
    }

    /// Names of every service seen so far, sorted.
    pub fn service_names(&self) -> Vec<String> {
        self.registry.service_names()
    }

    /// Registered workers of `service`, idle or busy.
    pub fn worker_count(&self, service: &str) -> usize {
        self.registry.worker_count(service)
    }

    /// Idle workers of `service`.
    pub fn idle_count(&self, service: &str) -> usize {
        self.registry.idle_count(service)
    }

    /// Requests queued for `service`.
    pub fn pending_count(&self, service: &str) -> usize {
        self.registry.pending_count(service)
    }

    fn process(&mut self, msg: T::Message) {
        match decode_broker_inbound(msg) {
            Ok(BrokerInbound::Client {
                sender,
                service,
                body,
            }) => self.client_request(sender, service, body),
            Ok(BrokerInbound::Worker {
                sender,
                command,
                body,
            }) => self.worker_command(sender, command, body),
            Err(e) => warn!(error = %e, "Dropping invalid message"),
        }
    }

    fn client_request(
        &mut self,
        sender: <T::Message as Multipart>::Frame,
        service: String,
        mut body: T::Message,
    ) {
        if is_mmi(&service) {
            self.internal_service(sender, &service, body);
            return;
        }
        debug!(service = %service, client = %hex::encode_upper(&*sender), "Request queued");
        body.wrap(sender);
        self.registry.enqueue(&service, body);
        self.dispatch(&service);
    }

    fn internal_service(
        &mut self,
        sender: <T::Message as Multipart>::Frame,
        service: &str,
        body: T::Message,
    ) {
        let status = if service == MMI_SERVICE {
            let target = body
                .first()
                .map(|name| String::from_utf8_lossy(name).into_owned())
                .unwrap_or_default();
            if self.registry.worker_count(&target) > 0 {
                mmi_status::OK
            } else {
                mmi_status::NOT_FOUND
            }
        } else {
            mmi_status::NOT_IMPLEMENTED
        };
        debug!(
            service,
            status = %String::from_utf8_lossy(status),
            "Answered internal service"
        );
        let reply = encode_client_reply(sender, service, <T::Message>::from_frames([status]));
        self.send(reply);
    }

    fn worker_command(
        &mut self,
        sender: <T::Message as Multipart>::Frame,
        command: Command,
        mut body: T::Message,
    ) {
        let identity = hex::encode_upper(&*sender);

        match command {
            Command::Ready => {
                if self.registry.worker(&identity).is_some() {
                    warn!(worker = %identity, "Duplicate READY");
                    self.disconnect(sender, &identity);
                    return;
                }
                let service = match body.pop_front().map(|frame| decode_service(&frame)) {
                    Some(Ok(service)) if !is_mmi(&service) => service,
                    Some(Ok(service)) => {
                        warn!(worker = %identity, service = %service, "READY for reserved service");
                        self.disconnect(sender, &identity);
                        return;
                    }
                    Some(Err(e)) => {
                        warn!(worker = %identity, error = %e, "READY with invalid service");
                        self.disconnect(sender, &identity);
                        return;
                    }
                    None => {
                        warn!(worker = %identity, "READY without service");
                        self.disconnect(sender, &identity);
                        return;
                    }
                };
                info!(worker = %identity, service = %service, "Worker registered");
                let expiry = self.expiry();
                self.registry
                    .register(identity.clone(), sender, service.clone(), expiry);
                self.registry.release(&identity, expiry);
                self.dispatch(&service);
            }
            Command::Reply => {
                let Some(worker) = self.registry.worker(&identity) else {
                    debug!(worker = %identity, "REPLY from unknown worker dropped");
                    return;
                };
                if !worker.is_busy() {
                    warn!(worker = %identity, "REPLY without outstanding request dropped");
                    return;
                }
                let service = worker.service().to_string();
                match body.unwrap_address() {
                    Some(client) => {
                        let reply = encode_client_reply(client, &service, body);
                        self.send(reply);
                    }
                    None => warn!(worker = %identity, "REPLY without client address dropped"),
                }
                let expiry = self.expiry();
                self.registry.release(&identity, expiry);
                self.dispatch(&service);
            }
            Command::Heartbeat => {
                let expiry = self.expiry();
                if !self.registry.refresh(&identity, expiry) {
                    debug!(worker = %identity, "HEARTBEAT from unknown worker");
                    self.send(encode_to_worker(
                        sender,
                        Command::Disconnect,
                        <T::Message>::default(),
                    ));
                }
            }
            Command::Disconnect => {
                if let Some(worker) = self.registry.purge(&identity) {
                    info!(worker = %identity, service = %worker.service(), "Worker disconnected");
                }
            }
            Command::Request => {
                warn!(worker = %identity, "Unexpected REQUEST from worker dropped");
            }
        }
    }

    /// Hand queued requests of `service` to its idle workers.
    fn dispatch(&mut self, service: &str) {
        for identity in self.registry.expired(Some(service), Instant::now()) {
            debug!(worker = %identity, service, "Purging expired worker");
            self.registry.purge(&identity);
        }
        while let Some((address, request)) = self.registry.assign(service) {
            debug!(
                worker = %hex::encode_upper(&*address),
                service,
                "Dispatching request"
            );
            self.send(encode_to_worker(address, Command::Request, request));
        }
    }

    fn heartbeat_tick(&mut self, now: Instant) {
        for identity in self.registry.expired(None, now) {
            if let Some(worker) = self.registry.purge(&identity) {
                info!(worker = %identity, service = %worker.service(), "Worker expired");
            }
        }
        let idle = self.registry.idle_addresses();
        debug!(idle = self.registry.waiting_count(), "Heartbeat tick");
        for address in idle {
            self.send(encode_to_worker(
                address,
                Command::Heartbeat,
                <T::Message>::default(),
            ));
        }
    }

    /// Tell a worker to go away and forget it.
    fn disconnect(&mut self, address: <T::Message as Multipart>::Frame, identity: &str) {
        self.send(encode_to_worker(
            address,
            Command::Disconnect,
            <T::Message>::default(),
        ));
        if let Some(worker) = self.registry.purge(identity) {
            debug!(
                worker = %hex::encode_upper(worker.address()),
                service = %worker.service(),
                "Worker purged"
            );
        }
    }

    fn expiry(&self) -> Instant {
        deadline(Instant::now(), self.config.expiry())
    }

    fn send(&mut self, msg: T::Message) {
        if let Err(e) = self.transport.send(msg) {
            warn!(error = %e, "Send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ByteMultipart;
    use crate::transport::{memory_pair, MemoryPeer, MemoryTransport};

    const READY: &[u8] = &[1];
    const REPLY: &[u8] = &[3];
    const HEARTBEAT: &[u8] = &[4];
    const DISCONNECT: &[u8] = &[5];

    fn broker() -> (Broker<MemoryTransport>, MemoryPeer) {
        let (transport, peer) = memory_pair();
        let config = BrokerConfig {
            heartbeat_interval: Duration::from_millis(100),
            heartbeat_liveness: 3,
        };
        (Broker::with_transport(transport, config), peer)
    }

    fn feed(broker: &mut Broker<MemoryTransport>, frames: &[&[u8]]) {
        broker.process(ByteMultipart::from_frames(frames.iter().copied()));
    }

    fn ready(broker: &mut Broker<MemoryTransport>, worker: &str, service: &str) {
        feed(broker, &[worker.as_bytes(), b"", b"MDPW01", READY, service.as_bytes()]);
    }

    fn request(broker: &mut Broker<MemoryTransport>, client: &str, service: &str, body: &str) {
        feed(
            broker,
            &[client.as_bytes(), b"", b"MDPC01", service.as_bytes(), body.as_bytes()],
        );
    }

    fn reply(broker: &mut Broker<MemoryTransport>, worker: &str, client: &str, body: &str) {
        feed(
            broker,
            &[worker.as_bytes(), b"", b"MDPW01", REPLY, client.as_bytes(), b"", body.as_bytes()],
        );
    }

    fn sent(peer: &MemoryPeer) -> Vec<Vec<Vec<u8>>> {
        peer.take_sent().iter().map(|m| m.to_vecs()).collect()
    }

    fn to_worker(worker: &str, command: u8, payload: &[&str]) -> Vec<Vec<u8>> {
        let mut frames = vec![worker.as_bytes().to_vec(), vec![], b"MDPW01".to_vec(), vec![command]];
        frames.extend(payload.iter().map(|p| p.as_bytes().to_vec()));
        frames
    }

    fn to_client(client: &str, service: &str, body: &str) -> Vec<Vec<u8>> {
        vec![
            client.as_bytes().to_vec(),
            vec![],
            b"MDPC01".to_vec(),
            service.as_bytes().to_vec(),
            body.as_bytes().to_vec(),
        ]
    }

    #[test]
    fn test_request_queued_until_worker_ready() {
        let (mut broker, peer) = broker();

        request(&mut broker, "c1", "echo", "first");
        request(&mut broker, "c2", "echo", "second");
        assert_eq!(broker.pending_count("echo"), 2);
        assert!(sent(&peer).is_empty());

        ready(&mut broker, "w1", "echo");
        // Only the oldest request goes out; the worker is now busy
        assert_eq!(sent(&peer), vec![to_worker("w1", 2, &["c1", "", "first"])]);
        assert_eq!(broker.pending_count("echo"), 1);
        assert_eq!(broker.idle_count("echo"), 0);
    }

    #[test]
    fn test_oldest_idle_worker_served_first() {
        let (mut broker, peer) = broker();
        ready(&mut broker, "w1", "echo");
        ready(&mut broker, "w2", "echo");
        ready(&mut broker, "w3", "echo");

        request(&mut broker, "c1", "echo", "a");
        request(&mut broker, "c2", "echo", "b");

        assert_eq!(
            sent(&peer),
            vec![
                to_worker("w1", 2, &["c1", "", "a"]),
                to_worker("w2", 2, &["c2", "", "b"])
            ]
        );
        assert_eq!(broker.idle_count("echo"), 1);
    }

    #[test]
    fn test_reply_routed_to_client_and_worker_requeued() {
        let (mut broker, peer) = broker();
        ready(&mut broker, "w1", "echo");
        request(&mut broker, "c1", "echo", "one");
        request(&mut broker, "c2", "echo", "two");
        sent(&peer);

        reply(&mut broker, "w1", "c1", "ONE");
        assert_eq!(
            sent(&peer),
            vec![
                to_client("c1", "echo", "ONE"),
                to_worker("w1", 2, &["c2", "", "two"])
            ]
        );
    }

    #[test]
    fn test_at_most_one_request_in_flight() {
        let (mut broker, peer) = broker();
        ready(&mut broker, "w1", "echo");
        for i in 0..5 {
            request(&mut broker, "c1", "echo", &i.to_string());
        }
        assert_eq!(sent(&peer), vec![to_worker("w1", 2, &["c1", "", "0"])]);
        assert_eq!(broker.pending_count("echo"), 4);

        // Each reply frees the worker for exactly one more request
        reply(&mut broker, "w1", "c1", "r0");
        assert_eq!(
            sent(&peer),
            vec![
                to_client("c1", "echo", "r0"),
                to_worker("w1", 2, &["c1", "", "1"])
            ]
        );
        assert_eq!(broker.pending_count("echo"), 3);
        assert_eq!(broker.idle_count("echo"), 0);
    }

    #[test]
    fn test_reply_from_idle_worker_dropped() {
        let (mut broker, peer) = broker();
        ready(&mut broker, "w1", "echo");
        reply(&mut broker, "w1", "c1", "stray");

        assert!(sent(&peer).is_empty());
        assert_eq!(broker.idle_count("echo"), 1);
    }

    #[test]
    fn test_unknown_worker_messages() {
        let (mut broker, peer) = broker();

        reply(&mut broker, "ghost", "c1", "x");
        feed(&mut broker, &[b"ghost", b"", b"MDPW01", DISCONNECT]);
        assert!(sent(&peer).is_empty());

        feed(&mut broker, &[b"ghost", b"", b"MDPW01", HEARTBEAT]);
        assert_eq!(sent(&peer), vec![to_worker("ghost", 5, &[])]);
        assert!(broker.service_names().is_empty());
    }

    #[test]
    fn test_duplicate_ready_disconnects() {
        let (mut broker, peer) = broker();
        ready(&mut broker, "w1", "echo");
        ready(&mut broker, "w1", "echo");

        assert_eq!(sent(&peer), vec![to_worker("w1", 5, &[])]);
        assert_eq!(broker.worker_count("echo"), 0);
        assert_eq!(broker.idle_count("echo"), 0);
    }

    #[test]
    fn test_ready_for_reserved_service_disconnects() {
        let (mut broker, peer) = broker();
        ready(&mut broker, "w1", "mmi.service");
        feed(&mut broker, &[b"w2", b"", b"MDPW01", READY]);

        assert_eq!(
            sent(&peer),
            vec![to_worker("w1", 5, &[]), to_worker("w2", 5, &[])]
        );
        assert_eq!(broker.worker_count("mmi.service"), 0);
    }

    #[test]
    fn test_worker_disconnect_purges() {
        let (mut broker, peer) = broker();
        ready(&mut broker, "w1", "echo");
        feed(&mut broker, &[b"w1", b"", b"MDPW01", DISCONNECT]);

        assert!(sent(&peer).is_empty());
        assert_eq!(broker.worker_count("echo"), 0);

        request(&mut broker, "c1", "echo", "queued");
        assert!(sent(&peer).is_empty());
        assert_eq!(broker.pending_count("echo"), 1);
    }

    #[test]
    fn test_mmi_service_lookup() {
        let (mut broker, peer) = broker();
        ready(&mut broker, "w1", "echo");

        request(&mut broker, "c1", "mmi.service", "echo");
        request(&mut broker, "c1", "mmi.service", "nonexistent");
        request(&mut broker, "c1", "mmi.bogus", "echo");

        assert_eq!(
            sent(&peer),
            vec![
                to_client("c1", "mmi.service", "200"),
                to_client("c1", "mmi.service", "404"),
                to_client("c1", "mmi.bogus", "501"),
            ]
        );
        // Lookups never create services
        assert_eq!(broker.service_names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_mmi_counts_busy_workers() {
        let (mut broker, peer) = broker();
        ready(&mut broker, "w1", "echo");
        request(&mut broker, "c1", "echo", "work");
        sent(&peer);

        request(&mut broker, "c2", "mmi.service", "echo");
        assert_eq!(sent(&peer), vec![to_client("c2", "mmi.service", "200")]);
    }

    #[test]
    fn test_heartbeat_tick_purges_expired_and_pings_idle() {
        let (mut broker, peer) = broker();
        ready(&mut broker, "old", "echo");
        ready(&mut broker, "fresh", "echo");

        broker.heartbeat_tick(Instant::now());
        assert_eq!(
            sent(&peer),
            vec![to_worker("old", 4, &[]), to_worker("fresh", 4, &[])]
        );

        // Expiry is 300ms; only "fresh" has shown signs of life since
        std::thread::sleep(Duration::from_millis(150));
        feed(&mut broker, &[b"fresh", b"", b"MDPW01", HEARTBEAT]);
        broker.heartbeat_tick(Instant::now() + Duration::from_millis(200));

        assert_eq!(sent(&peer), vec![to_worker("fresh", 4, &[])]);
        assert_eq!(broker.worker_count("echo"), 1);
    }

    #[test]
    fn test_expired_worker_never_dispatched() {
        let (mut broker, peer) = broker();
        ready(&mut broker, "w1", "echo");
        std::thread::sleep(Duration::from_millis(350));

        request(&mut broker, "c1", "echo", "late");
        assert!(sent(&peer).is_empty());
        assert_eq!(broker.worker_count("echo"), 0);
        assert_eq!(broker.pending_count("echo"), 1);
    }

    #[test]
    fn test_malformed_messages_skipped() {
        let (mut broker, peer) = broker();
        feed(&mut broker, &[b"c1", b""]);
        feed(&mut broker, &[b"c1", b"", b"BOGUS", b"echo", b"x"]);
        feed(&mut broker, &[b"w1", b"", b"MDPW01", &[9]]);

        ready(&mut broker, "w1", "echo");
        request(&mut broker, "c1", "echo", "ok");
        assert_eq!(sent(&peer), vec![to_worker("w1", 2, &["c1", "", "ok"])]);
    }

    #[test]
    fn test_run_stops_and_closes_transport() {
        let (mut broker, peer) = broker();
        let stop = broker.stop_handle();
        peer.deliver([&b"w1"[..], b"", b"MDPW01", READY, b"echo"]);

        let handle = std::thread::spawn(move || {
            let result = broker.run();
            (result, broker)
        });
        // The worker keeps heartbeating, so it never expires
        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(25));
            peer.deliver([&b"w1"[..], b"", b"MDPW01", HEARTBEAT]);
        }
        stop.stop();

        let (result, mut broker) = handle.join().unwrap();
        result.unwrap();
        assert!(peer.is_closed());
        assert_eq!(broker.worker_count("echo"), 1);
        // At least one heartbeat tick reached the idle worker
        assert!(sent(&peer).contains(&to_worker("w1", 4, &[])));
        broker.shutdown().unwrap();
    }

    #[test]
    fn test_run_survives_transport_faults() {
        let (mut broker, peer) = broker();
        let stop = broker.stop_handle();
        peer.fail_recvs(1);
        peer.fail_sends(1);
        peer.deliver([&b"w1"[..], b"", b"MDPW01", READY, b"echo"]);
        // Answering this lookup hits the send fault
        peer.deliver([&b"c0"[..], b"", b"MDPC01", b"mmi.service", b"echo"]);
        peer.deliver([&b"c1"[..], b"", b"MDPC01", b"echo", b"work"]);

        let handle = std::thread::spawn(move || {
            let result = broker.run();
            (result, broker)
        });
        let dispatched = peer.wait_sent(Duration::from_secs(5));
        stop.stop();

        let (result, broker) = handle.join().unwrap();
        result.unwrap();
        assert_eq!(
            dispatched.map(|msg| msg.to_vecs()),
            Some(to_worker("w1", 2, &["c1", "", "work"]))
        );
        assert_eq!(broker.worker_count("echo"), 1);
        assert_eq!(broker.pending_count("echo"), 0);
    }
}
