//! The dispatcher server. It accepts any number of independent connections;
//! each connection is served by its own thread and owns a private handle
//! table, so handle namespaces never overlap between clients and thread
//! ownership stands in for locking. When a connection ends, for whatever
//! reason, its table is dropped and every object it held is released —
//! other connections are unaffected.

use std::{
    cell::RefCell,
    io::{BufReader, BufWriter},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    rc::Rc,
    thread,
};

use tracing::{debug, info, warn};

use lernen::{
    algorithm::{AlgorithmKind, AlgorithmSpec, Learner},
    automaton::BasicAutomaton,
    codec::{self, CodecError, Reader},
    error::Error,
    knowledge::KnowledgeStore,
    logger::{LogBuffer, SharedLogBuffer},
    math,
};

use crate::wire::{self, Incoming, Opcode, Request, Response};

/// The per-connection object table. Handles are dense and never reused
/// within a connection.
struct ObjectTable {
    next_handle: u32,
    knowledgebases: math::Map<u32, Rc<RefCell<KnowledgeStore>>>,
    learners: math::Map<u32, Learner>,
    loggers: math::Map<u32, SharedLogBuffer>,
}

impl ObjectTable {
    fn new() -> Self {
        Self {
            next_handle: 1,
            knowledgebases: math::Map::default(),
            learners: math::Map::default(),
            loggers: math::Map::default(),
        }
    }

    fn fresh_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn len(&self) -> usize {
        self.knowledgebases.len() + self.learners.len() + self.loggers.len()
    }

    fn knowledgebase(&self, handle: u32) -> Result<&Rc<RefCell<KnowledgeStore>>, Error> {
        self.knowledgebases
            .get(&handle)
            .ok_or_else(|| stale_handle("knowledgebase", handle))
    }

    fn learner_mut(&mut self, handle: u32) -> Result<&mut Learner, Error> {
        self.learners
            .get_mut(&handle)
            .ok_or_else(|| stale_handle("learner", handle))
    }

    fn logger(&self, handle: u32) -> Result<&SharedLogBuffer, Error> {
        self.loggers
            .get(&handle)
            .ok_or_else(|| stale_handle("logger", handle))
    }

    fn release(&mut self, handle: u32) -> Result<(), Error> {
        if self.knowledgebases.shift_remove(&handle).is_some()
            || self.learners.shift_remove(&handle).is_some()
            || self.loggers.shift_remove(&handle).is_some()
        {
            debug!("released handle {handle}");
            Ok(())
        } else {
            Err(stale_handle("object", handle))
        }
    }
}

fn stale_handle(kind: &str, handle: u32) -> Error {
    Error::Protocol(format!("no live {kind} for handle {handle}"))
}

/// A dispatcher server bound to a local address.
pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .map_err(|err| Error::Connection(format!("failed to bind listener: {err}")))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listener
            .local_addr()
            .map_err(|err| Error::Connection(err.to_string()))
    }

    /// Accepts connections forever, spawning one handler thread each.
    pub fn run(&self) -> Result<(), Error> {
        info!("dispatcher listening on {:?}", self.listener.local_addr());
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    thread::spawn(move || {
                        if let Err(error) = serve_connection(stream, peer) {
                            warn!("connection handler for {peer} failed: {error}");
                        }
                    });
                }
                Err(error) => {
                    warn!("failed to accept connection: {error}");
                }
            }
        }
    }

    /// Binds to `addr` and runs the accept loop on a background thread,
    /// returning the bound address. Convenient for tests and embedding.
    pub fn spawn<A: ToSocketAddrs>(
        addr: A,
    ) -> Result<(SocketAddr, thread::JoinHandle<()>), Error> {
        let server = Self::bind(addr)?;
        let addr = server.local_addr()?;
        let handle = thread::spawn(move || {
            if let Err(error) = server.run() {
                warn!("dispatcher accept loop terminated: {error}");
            }
        });
        Ok((addr, handle))
    }
}

fn serve_connection(stream: TcpStream, peer: SocketAddr) -> Result<(), Error> {
    info!("accepted connection from {peer}");
    let mut reader = BufReader::new(
        stream
            .try_clone()
            .map_err(|err| Error::Connection(err.to_string()))?,
    );
    let mut writer = BufWriter::new(stream);
    let mut table = ObjectTable::new();

    loop {
        let response = match wire::read_request(&mut reader) {
            Ok(Incoming::Disconnected) => {
                info!(
                    "{peer} disconnected, releasing {} objects",
                    table.len()
                );
                return Ok(());
            }
            Ok(Incoming::Malformed { sequence, error }) => {
                debug!("malformed frame from {peer}: {error}");
                Response {
                    sequence,
                    result: Err(error),
                }
            }
            Ok(Incoming::Request(request)) => {
                let result = dispatch(&mut table, &request);
                if let Err(error) = &result {
                    debug!("{:?} on handle {} failed: {error}", request.opcode, request.handle);
                }
                Response {
                    sequence: request.sequence,
                    result,
                }
            }
            Err(err) => {
                return Err(Error::Connection(format!(
                    "receiving from {peer} failed: {err}"
                )))
            }
        };
        wire::write_response(&mut writer, &response)
            .map_err(|err| Error::Connection(format!("responding to {peer} failed: {err}")))?;
    }
}

fn undersized(err: CodecError) -> Error {
    Error::Protocol(format!("undersized payload: {err}"))
}

/// Executes one request against the connection's object table. The returned
/// error keeps its kind, which the response serializes for the client to
/// re-raise.
fn dispatch(table: &mut ObjectTable, request: &Request) -> Result<Vec<u8>, Error> {
    let mut cursor = Reader::new(&request.payload);
    match request.opcode {
        Opcode::CreateKnowledgebase => {
            cursor.expect_end().map_err(undersized)?;
            let handle = table.fresh_handle();
            table
                .knowledgebases
                .insert(handle, Rc::new(RefCell::new(KnowledgeStore::new())));
            debug!("created knowledgebase with handle {handle}");
            Ok(encode_handle(handle))
        }
        Opcode::CreateLearner => {
            let kind_code = cursor.u8().map_err(undersized)?;
            let alphabet_size = cursor.u32().map_err(undersized)?;
            let kb_handle = cursor.u32().map_err(undersized)?;
            cursor.expect_end().map_err(undersized)?;

            let kind = AlgorithmKind::from_code(kind_code).ok_or_else(|| {
                Error::Protocol(format!("unknown algorithm kind code {kind_code}"))
            })?;
            let spec = match kind {
                AlgorithmKind::Angluin => AlgorithmSpec::Angluin { alphabet_size },
                AlgorithmKind::BiermannOriginal => {
                    AlgorithmSpec::BiermannOriginal { alphabet_size }
                }
            };
            let kb = Rc::clone(table.knowledgebase(kb_handle)?);
            let learner = Learner::new(spec, kb)?;
            let handle = table.fresh_handle();
            table.learners.insert(handle, learner);
            debug!("created {} learner with handle {handle}", spec.kind());
            Ok(encode_handle(handle))
        }
        Opcode::CreateLogger => {
            cursor.expect_end().map_err(undersized)?;
            let handle = table.fresh_handle();
            table.loggers.insert(handle, LogBuffer::shared());
            debug!("created logger with handle {handle}");
            Ok(encode_handle(handle))
        }
        Opcode::Release => {
            cursor.expect_end().map_err(undersized)?;
            table.release(request.handle)?;
            Ok(Vec::new())
        }
        Opcode::KbAddKnowledge => {
            let word = cursor.word().map_err(undersized)?;
            let label = cursor.u8().map_err(undersized)?;
            cursor.expect_end().map_err(undersized)?;
            let accept = match label {
                0 => false,
                1 => true,
                other => {
                    return Err(Error::Protocol(format!("invalid label byte {other}")))
                }
            };
            table
                .knowledgebase(request.handle)?
                .borrow_mut()
                .add_knowledge(&word, accept);
            Ok(Vec::new())
        }
        Opcode::KbResolveOrAddQuery => {
            let word = cursor.word().map_err(undersized)?;
            cursor.expect_end().map_err(undersized)?;
            let status = table
                .knowledgebase(request.handle)?
                .borrow_mut()
                .resolve_or_add_query(&word);
            Ok(vec![status.code()])
        }
        Opcode::KbGetQueries => {
            cursor.expect_end().map_err(undersized)?;
            let queries = table.knowledgebase(request.handle)?.borrow().queries();
            let mut payload = Vec::new();
            codec::put_u32(&mut payload, queries.len() as u32);
            for word in &queries {
                codec::put_word(&mut payload, word);
            }
            Ok(payload)
        }
        Opcode::KbSerialize => {
            cursor.expect_end().map_err(undersized)?;
            Ok(table.knowledgebase(request.handle)?.borrow().serialize())
        }
        Opcode::KbDeserialize => {
            // the payload is the serialized buffer itself
            table
                .knowledgebase(request.handle)?
                .borrow_mut()
                .deserialize(&request.payload)?;
            Ok(Vec::new())
        }
        Opcode::KbClear => {
            cursor.expect_end().map_err(undersized)?;
            table.knowledgebase(request.handle)?.borrow_mut().clear();
            Ok(Vec::new())
        }
        Opcode::AlgAdvance => {
            cursor.expect_end().map_err(undersized)?;
            match table.learner_mut(request.handle)?.advance()? {
                None => Ok(vec![0]),
                Some(hypothesis) => Ok(encode_hypothesis(&hypothesis)),
            }
        }
        Opcode::AlgAddCounterexample => {
            let word = cursor.word().map_err(undersized)?;
            cursor.expect_end().map_err(undersized)?;
            table
                .learner_mut(request.handle)?
                .add_counterexample(&word)?;
            Ok(Vec::new())
        }
        Opcode::AlgSetLogger => {
            let logger_handle = cursor.u32().map_err(undersized)?;
            cursor.expect_end().map_err(undersized)?;
            let log = Rc::clone(table.logger(logger_handle)?);
            table.learner_mut(request.handle)?.set_logger(log);
            Ok(Vec::new())
        }
        Opcode::AlgRemoveLogger => {
            cursor.expect_end().map_err(undersized)?;
            table.learner_mut(request.handle)?.remove_logger();
            Ok(Vec::new())
        }
        Opcode::LoggerReceiveAndFlush => {
            cursor.expect_end().map_err(undersized)?;
            let text = table
                .logger(request.handle)?
                .borrow_mut()
                .receive_and_flush();
            Ok(text.into_bytes())
        }
    }
}

fn encode_handle(handle: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4);
    codec::put_u32(&mut payload, handle);
    payload
}

fn encode_hypothesis(hypothesis: &BasicAutomaton) -> Vec<u8> {
    let mut payload = vec![1];
    hypothesis.encode(&mut payload);
    payload
}
