//! Integration tests for majordomo.
//!
//! Broker, workers and clients talk over real libzmq sockets on `inproc://`
//! endpoints. Each test creates its own context and shares it with every
//! session, so endpoints never collide between tests.

use std::collections::HashSet;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use majordomo::message::{Multipart, RawMultipart};
use majordomo::transport::ZmqSocket;
use majordomo::{AsyncClientSession, Broker, ClientSession, StopHandle, WorkerSession};

const HEARTBEAT: Duration = Duration::from_millis(100);

type BrokerThread = JoinHandle<(majordomo::Result<()>, Broker<ZmqSocket>)>;

fn start_broker(context: &zmq::Context, endpoint: &str) -> (StopHandle, BrokerThread) {
    let mut broker = Broker::builder()
        .heartbeat_interval(HEARTBEAT)
        .context(context)
        .bind(endpoint)
        .unwrap();
    let stop = broker.stop_handle();
    let handle = thread::spawn(move || {
        let result = broker.run();
        (result, broker)
    });
    (stop, handle)
}

/// Echo worker on its own thread; it runs until its socket fails.
fn start_echo_worker(context: &zmq::Context, endpoint: &str, service: &str) {
    let mut session = WorkerSession::builder(service)
        .heartbeat_interval(HEARTBEAT)
        .context(context)
        .connect(endpoint)
        .unwrap();
    thread::spawn(move || -> majordomo::Result<()> {
        let mut reply = None;
        while let Some(request) = session.recv(reply.take())? {
            reply = Some(request);
        }
        Ok(())
    });
}

fn client(context: &zmq::Context, endpoint: &str) -> ClientSession<ZmqSocket> {
    ClientSession::builder()
        .timeout(Duration::from_secs(2))
        .retries(3)
        .context(context)
        .connect(endpoint)
        .unwrap()
}

fn text(reply: &RawMultipart) -> Vec<String> {
    reply
        .to_vecs()
        .into_iter()
        .map(|frame| String::from_utf8(frame).unwrap())
        .collect()
}

/// Requests round-trip through the broker to an echo worker.
#[test]
fn test_echo_round_trip() {
    let context = zmq::Context::new();
    let endpoint = "inproc://echo-round-trip";
    let (stop, broker) = start_broker(&context, endpoint);
    start_echo_worker(&context, endpoint, "echo");

    let mut client = client(&context, endpoint);
    for index in 0..20 {
        let body = format!("hello {}", index);
        let reply = client
            .send("echo", RawMultipart::from_frames([body.as_str(), "second frame"]))
            .unwrap()
            .expect("reply");
        assert_eq!(text(&reply), vec![body, "second frame".to_string()]);
    }
    client.shutdown().unwrap();

    stop.stop();
    let (result, broker) = broker.join().unwrap();
    result.unwrap();
    assert_eq!(broker.worker_count("echo"), 1);
    assert_eq!(broker.pending_count("echo"), 0);
}

/// The broker's discovery service reports which services have workers.
#[test]
fn test_mmi_service_lookup() {
    let context = zmq::Context::new();
    let endpoint = "inproc://mmi";
    let (stop, broker) = start_broker(&context, endpoint);
    start_echo_worker(&context, endpoint, "echo");

    let mut client = client(&context, endpoint);
    // Wait until the worker has registered
    client
        .send("echo", RawMultipart::from_frames(["ping"]))
        .unwrap()
        .expect("reply");

    let lookup = |client: &mut ClientSession<ZmqSocket>, service: &str, target: &str| {
        let reply = client
            .send(service, RawMultipart::from_frames([target]))
            .unwrap()
            .expect("reply");
        text(&reply)
    };
    assert_eq!(lookup(&mut client, "mmi.service", "echo"), vec!["200"]);
    assert_eq!(lookup(&mut client, "mmi.service", "nonexistent"), vec!["404"]);
    assert_eq!(lookup(&mut client, "mmi.bogus", "echo"), vec!["501"]);
    client.shutdown().unwrap();

    stop.stop();
    let (result, broker) = broker.join().unwrap();
    result.unwrap();
    assert_eq!(broker.service_names(), vec!["echo".to_string()]);
}

/// Requests queued before any worker exists are served once one registers.
#[test]
fn test_requests_wait_for_worker() {
    let context = zmq::Context::new();
    let endpoint = "inproc://late-worker";
    let (stop, broker) = start_broker(&context, endpoint);

    let mut client = client(&context, endpoint);
    let worker_context = context.clone();
    let starter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        start_echo_worker(&worker_context, endpoint, "late");
    });

    let reply = client
        .send("late", RawMultipart::from_frames(["queued"]))
        .unwrap()
        .expect("reply");
    assert_eq!(text(&reply), vec!["queued"]);
    starter.join().unwrap();
    client.shutdown().unwrap();

    stop.stop();
    broker.join().unwrap().0.unwrap();
}

/// Several requests in flight from one async client all get answered.
#[test]
fn test_async_client() {
    let context = zmq::Context::new();
    let endpoint = "inproc://async";
    let (stop, broker) = start_broker(&context, endpoint);
    start_echo_worker(&context, endpoint, "echo");
    start_echo_worker(&context, endpoint, "echo");

    let mut client = AsyncClientSession::builder()
        .timeout(Duration::from_secs(2))
        .context(&context)
        .connect(endpoint)
        .unwrap();

    let sent: HashSet<String> = (0..10).map(|i| format!("request {}", i)).collect();
    for body in &sent {
        client
            .send("echo", RawMultipart::from_frames([body.as_str()]))
            .unwrap();
    }

    let mut received = HashSet::new();
    while received.len() < sent.len() {
        let reply = client.recv().unwrap().expect("reply before timeout");
        assert_eq!(reply.service, "echo");
        received.insert(text(&reply.body).remove(0));
    }
    assert_eq!(received, sent);
    client.shutdown().unwrap();

    stop.stop();
    broker.join().unwrap().0.unwrap();
}

/// Without a broker the client gives up after its retries.
#[test]
fn test_client_gives_up_without_broker() {
    let context = zmq::Context::new();
    let mut client = ClientSession::builder()
        .timeout(Duration::from_millis(50))
        .retries(2)
        .context(&context)
        .connect("inproc://nobody-home")
        .unwrap();

    let start = Instant::now();
    let reply = client
        .send("echo", RawMultipart::from_frames(["anyone?"]))
        .unwrap();

    assert!(reply.is_none());
    assert!(start.elapsed() >= Duration::from_millis(100));
    client.shutdown().unwrap();
}

/// A stopped broker leaves its loop within one heartbeat interval.
#[test]
fn test_stop_handle() {
    let context = zmq::Context::new();
    let (stop, broker) = start_broker(&context, "inproc://stop");

    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    stop.stop();
    let (result, mut broker) = broker.join().unwrap();

    result.unwrap();
    assert!(start.elapsed() < HEARTBEAT * 5);
    assert!(broker.service_names().is_empty());
    // Already shut down by run
    broker.shutdown().unwrap();
}
