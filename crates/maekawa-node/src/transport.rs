//! # transport
//!
//! why: move encoded protocol lines between nodes without reordering them per destination
//! relations: implements maekawa-core's Transport; the listener feeds the voter's inbound channel
//! what: TcpTransport (one outbound worker per destination), Listener, ChannelTransport

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use maekawa_core::Transport;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// How long queued lines keep being retried after `shutdown`
pub const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(120);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

struct Worker {
    lines: Sender<String>,
    handle: JoinHandle<()>,
}

/// Set once by `shutdown`; workers give up on a line only after this passes
type DrainDeadline = Arc<Mutex<Option<Instant>>>;

/// One-shot TCP connection per message
///
/// Each destination gets its own worker thread draining a FIFO queue, so two
/// messages to the same peer are always delivered in send order. A failed
/// connect is retried with a fixed backoff. `shutdown` refuses new lines but
/// lets every worker keep retrying what it already holds until the drain
/// deadline passes.
pub struct TcpTransport {
    retry_backoff: Duration,
    drain_deadline: Duration,
    closing: AtomicBool,
    drain_until: DrainDeadline,
    workers: Mutex<HashMap<SocketAddr, Worker>>,
    draining: Mutex<Vec<(SocketAddr, JoinHandle<()>)>>,
}

impl TcpTransport {
    pub fn new(retry_backoff: Duration) -> Self {
        Self {
            retry_backoff,
            drain_deadline: DEFAULT_DRAIN_DEADLINE,
            closing: AtomicBool::new(false),
            drain_until: Arc::new(Mutex::new(None)),
            workers: Mutex::new(HashMap::new()),
            draining: Mutex::new(Vec::new()),
        }
    }

    pub fn with_drain_deadline(mut self, deadline: Duration) -> Self {
        self.drain_deadline = deadline;
        self
    }

    fn spawn_worker(&self, addr: SocketAddr) -> io::Result<Worker> {
        let (lines, queue) = unbounded::<String>();
        let drain_until = self.drain_until.clone();
        let backoff = self.retry_backoff;
        let handle = thread::Builder::new()
            .name(format!("outbound-{addr}"))
            .spawn(move || {
                for line in queue.iter() {
                    deliver_with_retry(addr, &line, backoff, &drain_until);
                }
            })?;
        Ok(Worker { lines, handle })
    }

    /// Stop accepting lines; queued ones are still delivered in the background
    pub fn shutdown(&self) {
        let workers = {
            let mut workers = self.workers.lock();
            if self.closing.swap(true, Ordering::SeqCst) {
                return;
            }
            *self.drain_until.lock() = Some(Instant::now() + self.drain_deadline);
            std::mem::take(&mut *workers)
        };
        let mut draining = self.draining.lock();
        for (addr, worker) in workers {
            // the worker exits once its queue is empty
            drop(worker.lines);
            draining.push((addr, worker.handle));
        }
    }

    /// Block until every queued line is delivered or dropped at the deadline
    pub fn wait_drained(&self) {
        let draining = std::mem::take(&mut *self.draining.lock());
        for (addr, handle) in draining {
            if handle.join().is_err() {
                warn!(%addr, "outbound worker panicked");
            }
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BACKOFF)
    }
}

impl Transport for TcpTransport {
    fn deliver(&self, addr: SocketAddr, line: String) {
        let mut workers = self.workers.lock();
        if self.closing.load(Ordering::SeqCst) {
            trace!(%addr, %line, "transport closed, dropping");
            return;
        }
        let worker = match workers.entry(addr) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match self.spawn_worker(addr) {
                Ok(worker) => entry.insert(worker),
                Err(e) => {
                    warn!(%addr, error = %e, "cannot start outbound worker");
                    return;
                }
            },
        };
        if worker.lines.send(line).is_err() {
            warn!(%addr, "outbound worker gone");
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
        self.wait_drained();
    }
}

fn deliver_with_retry(
    addr: SocketAddr,
    line: &str,
    backoff: Duration,
    drain_until: &DrainDeadline,
) {
    loop {
        let err = match send_line(addr, line) {
            Ok(()) => return,
            Err(e) => e,
        };
        match *drain_until.lock() {
            Some(deadline) if Instant::now() >= deadline => {
                warn!(%addr, %line, error = %err, "drain deadline passed, dropping line");
                return;
            }
            Some(_) => debug!(%addr, error = %err, "send failed while draining, retrying"),
            None => debug!(%addr, error = %err, "send failed, retrying"),
        }
        thread::sleep(backoff);
    }
}

fn send_line(addr: SocketAddr, line: &str) -> io::Result<()> {
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()
}

/// Accepts connections and reads one line from each, in accept order
pub struct Listener {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    pub fn bind(addr: SocketAddr, inbound: Sender<String>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name(format!("listener-{local_addr}"))
            .spawn(move || accept_loop(listener, inbound, flag))?;
        debug!(%local_addr, "listening");
        Ok(Self {
            local_addr,
            running,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        // unblock accept() with a throwaway connection
        let _ = TcpStream::connect_timeout(&wake_addr(self.local_addr), CONNECT_TIMEOUT);
        if handle.join().is_err() {
            warn!(addr = %self.local_addr, "listener panicked");
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wake_addr(mut addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        match addr {
            SocketAddr::V4(_) => addr.set_ip(Ipv4Addr::LOCALHOST.into()),
            SocketAddr::V6(_) => addr.set_ip(Ipv6Addr::LOCALHOST.into()),
        }
    }
    addr
}

fn accept_loop(listener: TcpListener, inbound: Sender<String>, running: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                debug!(error = %e, "accept failed");
                continue;
            }
        };
        match read_line(stream) {
            Ok(Some(line)) => {
                if inbound.send(line).is_err() {
                    trace!("inbound channel closed, dropping line");
                }
            }
            Ok(None) => trace!("empty connection"),
            Err(e) => debug!(error = %e, "read failed"),
        }
    }
}

fn read_line(stream: TcpStream) -> io::Result<Option<String>> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let line = line.trim();
    Ok((!line.is_empty()).then(|| line.to_string()))
}

/// In-process transport: each address maps straight to a node's inbound channel
///
/// Channels are FIFO, so per-destination ordering matches the TCP transport.
#[derive(Default)]
pub struct ChannelTransport {
    routes: HashMap<SocketAddr, Sender<String>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&mut self, addr: SocketAddr, inbound: Sender<String>) {
        self.routes.insert(addr, inbound);
    }
}

impl Transport for ChannelTransport {
    fn deliver(&self, addr: SocketAddr, line: String) {
        match self.routes.get(&addr) {
            Some(inbound) => {
                if inbound.send(line).is_err() {
                    trace!(%addr, "inbound channel closed, dropping line");
                }
            }
            None => warn!(%addr, "no route"),
        }
    }
}
