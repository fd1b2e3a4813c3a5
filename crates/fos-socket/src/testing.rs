//! Test doubles for the transport, resolver and security seams.

use crate::error::{NetError, NetResult};
use crate::resolver::AddressResolver;
use crate::security::{AccessDecision, SecurityGate};
use crate::transport::{ByteStream, Listener, RawSocket, SystemTransport, Transport};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory stream: reads from a fixed buffer, records writes
pub struct MemoryStream {
    input: Cursor<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    shutdowns: Arc<AtomicUsize>,
}

impl MemoryStream {
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: Cursor::new(input.to_vec()),
            written: Arc::new(Mutex::new(Vec::new())),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        self.written.clone()
    }

    pub fn shutdowns(&self) -> Arc<AtomicUsize> {
        self.shutdowns.clone()
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for MemoryStream {
    fn shutdown(&self) -> io::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

/// Scripted result of one connect call
enum Outcome {
    Connected(Vec<u8>),
    Failed(io::ErrorKind),
}

#[derive(Default)]
struct Script {
    outcomes: Mutex<VecDeque<Outcome>>,
    created: AtomicUsize,
    closed: AtomicUsize,
    connects: Mutex<Vec<SocketAddrV4>>,
    streams: Mutex<Vec<Arc<Mutex<Vec<u8>>>>>,
}

/// Transport whose connect calls follow a script.
///
/// Unscripted connects fail with `ConnectionRefused`.
#[derive(Clone, Default)]
pub struct FakeTransport {
    script: Arc<Script>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next connect succeeds; the stream will read `input`
    pub fn connect_ok(&self, input: &[u8]) -> &Self {
        self.push(Outcome::Connected(input.to_vec()))
    }

    /// Next connect fails with `kind`
    pub fn connect_err(&self, kind: io::ErrorKind) -> &Self {
        self.push(Outcome::Failed(kind))
    }

    fn push(&self, outcome: Outcome) -> &Self {
        self.script.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    /// Sockets created so far
    pub fn created(&self) -> usize {
        self.script.created.load(Ordering::SeqCst)
    }

    /// Sockets closed without yielding a stream
    pub fn closed(&self) -> usize {
        self.script.closed.load(Ordering::SeqCst)
    }

    /// Addresses passed to connect, in order
    pub fn connects(&self) -> Vec<SocketAddrV4> {
        self.script.connects.lock().unwrap().clone()
    }

    /// Bytes written to the n-th established stream
    pub fn written(&self, n: usize) -> Vec<u8> {
        self.script.streams.lock().unwrap()[n].lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn create_socket(&self) -> io::Result<Box<dyn RawSocket>> {
        self.script.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSocket {
            script: self.script.clone(),
            input: None,
        }))
    }

    fn bind(&self, _addr: SocketAddrV4) -> io::Result<Box<dyn Listener>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "fake transport cannot listen"))
    }
}

struct FakeSocket {
    script: Arc<Script>,
    input: Option<Vec<u8>>,
}

impl RawSocket for FakeSocket {
    fn connect(&mut self, addr: SocketAddrV4, _timeout: Option<Duration>) -> io::Result<()> {
        self.script.connects.lock().unwrap().push(addr);
        let outcome = self.script.outcomes.lock().unwrap().pop_front();
        match outcome {
            Some(Outcome::Connected(input)) => {
                self.input = Some(input);
                Ok(())
            }
            Some(Outcome::Failed(kind)) => Err(io::Error::new(kind, "scripted failure")),
            None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "unscripted connect")),
        }
    }

    fn into_stream(mut self: Box<Self>) -> Box<dyn ByteStream> {
        let stream = MemoryStream::with_input(&self.input.take().unwrap_or_default());
        self.script.streams.lock().unwrap().push(stream.written());
        // Mark as handed over so Drop does not count a close
        self.input = Some(Vec::new());
        Box::new(stream)
    }
}

impl Drop for FakeSocket {
    fn drop(&mut self) {
        if self.input.is_none() {
            self.script.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Real sockets whose bind and accept calls fail a set number of times first
#[derive(Clone)]
pub struct FlakyTransport {
    bind_failures: Arc<AtomicUsize>,
    accept_failures: Arc<AtomicUsize>,
    rebind_failures: Arc<AtomicUsize>,
    bound: Arc<AtomicBool>,
    binds: Arc<AtomicUsize>,
}

impl FlakyTransport {
    pub fn new(bind_failures: usize, accept_failures: usize) -> Self {
        Self {
            bind_failures: Arc::new(AtomicUsize::new(bind_failures)),
            accept_failures: Arc::new(AtomicUsize::new(accept_failures)),
            rebind_failures: Arc::new(AtomicUsize::new(0)),
            bound: Arc::new(AtomicBool::new(false)),
            binds: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail this many binds once a first bind has succeeded
    pub fn with_rebind_failures(self, failures: usize) -> Self {
        self.rebind_failures.store(failures, Ordering::SeqCst);
        self
    }

    /// Bind calls made so far, failed ones included
    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Transport for FlakyTransport {
    fn create_socket(&self) -> io::Result<Box<dyn RawSocket>> {
        SystemTransport.create_socket()
    }

    fn bind(&self, addr: SocketAddrV4) -> io::Result<Box<dyn Listener>> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        let scripted = if self.bound.load(Ordering::SeqCst) {
            &self.rebind_failures
        } else {
            &self.bind_failures
        };
        if take_one(scripted) {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "scripted bind failure"));
        }

        let inner = SystemTransport.bind(addr)?;
        self.bound.store(true, Ordering::SeqCst);
        Ok(Box::new(FlakyListener {
            inner,
            accept_failures: self.accept_failures.clone(),
        }))
    }
}

struct FlakyListener {
    inner: Box<dyn Listener>,
    accept_failures: Arc<AtomicUsize>,
}

impl Listener for FlakyListener {
    fn local_addr(&self) -> io::Result<SocketAddrV4> {
        self.inner.local_addr()
    }

    fn listen(&self, backlog: i32) -> io::Result<()> {
        self.inner.listen(backlog)
    }

    fn accept(&self) -> io::Result<(Box<dyn ByteStream>, SocketAddr)> {
        if take_one(&self.accept_failures) {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted accept failure"));
        }
        self.inner.accept()
    }
}

/// Resolver backed by a fixed table; unknown names fail with `UnknownHost`
#[derive(Default)]
pub struct FakeResolver {
    table: HashMap<String, Ipv4Addr>,
    lookups: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, addr: Ipv4Addr) -> Self {
        self.table.insert(host.to_string(), addr);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl AddressResolver for FakeResolver {
    fn resolve(&self, host: &str) -> NetResult<Ipv4Addr> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            return Ok(addr);
        }
        self.table
            .get(host)
            .copied()
            .ok_or_else(|| NetError::UnknownHost(host.to_string()))
    }
}

/// Gate denying every attempt as `principal`, recording reports
pub struct DenyingGate {
    principal: String,
    reports: Mutex<Vec<String>>,
}

impl DenyingGate {
    pub fn new(principal: &str) -> Self {
        Self {
            principal: principal.to_string(),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().unwrap().clone()
    }
}

impl SecurityGate for DenyingGate {
    fn verify_access(&self, _host: &str, _port: u16) -> AccessDecision {
        AccessDecision::Deny(self.principal.clone())
    }

    fn report_violation(&self, message: &str) {
        self.reports.lock().unwrap().push(message.to_string());
    }
}
