//! The client side of the dispatcher: one persistent connection per
//! factory, proxies that hold nothing but their handle, and strict
//! correlation of responses to requests. Local and remote use are meant to
//! be indistinguishable, so the proxies implement the object traits of
//! [`lernen::factory`].

use std::{
    cell::{Cell, RefCell},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    rc::Rc,
    time::Duration,
};

use tracing::{debug, info, trace};

use lernen::{
    algorithm::AlgorithmSpec,
    automaton::BasicAutomaton,
    codec::{self, CodecError, Reader},
    error::Error,
    factory::{Factory, Knowledgebase, LearningAlgorithm, Logger},
    knowledge::Knowledge,
    word::Word,
};

use crate::wire::{self, Opcode, Request};

/// A connection to a dispatcher server. All proxies created through one
/// [`RemoteFactory`] multiplex their calls over this single stream; the
/// sequence-number correlation would also admit multiple in-flight calls,
/// but this client keeps one outstanding call at a time.
///
/// After a transport failure, a protocol violation or an explicit
/// [`close`](Self::close), the connection is poisoned: every further call
/// fails immediately with [`Error::Connection`] instead of touching the
/// socket.
pub struct Connection {
    stream: RefCell<TcpStream>,
    next_sequence: Cell<u32>,
    poisoned: Cell<bool>,
}

impl Connection {
    /// Connects and bounds every subsequent receive by `timeout`, so a dead
    /// link surfaces as an error rather than a stalled call.
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr)
            .map_err(|err| Error::Connection(format!("connect failed: {err}")))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|err| Error::Connection(err.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|err| Error::Connection(err.to_string()))?;
        info!("connected to dispatcher at {:?}", stream.peer_addr());
        Ok(Self {
            stream: RefCell::new(stream),
            next_sequence: Cell::new(0),
            poisoned: Cell::new(false),
        })
    }

    /// Issues one call and awaits its correlated response. This is the
    /// primitive under all proxy methods; it is public for tests and for
    /// callers that need to speak the protocol directly.
    pub fn call(&self, opcode: Opcode, handle: u32, payload: Vec<u8>) -> Result<Vec<u8>, Error> {
        if self.poisoned.get() {
            return Err(Error::Connection("connection is closed".to_string()));
        }
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence.wrapping_add(1));
        trace!("call {opcode:?} handle {handle} seq {sequence}");

        let mut stream = self.stream.borrow_mut();
        let request = Request {
            sequence,
            opcode,
            handle,
            payload,
        };
        if let Err(err) = wire::write_request(&mut *stream, &request) {
            self.poisoned.set(true);
            return Err(wire::connection_error(err));
        }
        let response = match wire::read_response(&mut *stream) {
            Ok(response) => response,
            Err(error) => {
                // both transport failures and garbled frames leave the
                // stream unusable
                self.poisoned.set(true);
                return Err(error);
            }
        };
        if response.sequence != sequence {
            self.poisoned.set(true);
            return Err(Error::Protocol(format!(
                "response sequence {} does not match request sequence {sequence}",
                response.sequence
            )));
        }
        // a server-side error arrives here with its original kind
        response.result
    }

    /// Closes the connection. Every handle bound to it becomes unusable;
    /// closing is also the only way to abandon an in-flight call.
    pub fn close(&self) {
        if !self.poisoned.replace(true) {
            debug!("closing dispatcher connection");
            let _ = self.stream.borrow().shutdown(Shutdown::Both);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.poisoned.get()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn proxy_error(err: CodecError) -> Error {
    Error::Protocol(format!("malformed response payload: {err}"))
}

fn expect_empty(payload: &[u8]) -> Result<(), Error> {
    Reader::new(payload).expect_end().map_err(proxy_error)
}

fn parse_handle(payload: &[u8]) -> Result<u32, Error> {
    let mut cursor = Reader::new(payload);
    let handle = cursor.u32().map_err(proxy_error)?;
    cursor.expect_end().map_err(proxy_error)?;
    Ok(handle)
}

/// A factory whose objects live on a dispatcher server. Dropping a proxy
/// sends a best-effort release for its server-side instance; dropping the
/// factory (and with it the last proxies) closes the connection.
pub struct RemoteFactory {
    connection: Rc<Connection>,
}

impl RemoteFactory {
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Self, Error> {
        Ok(Self {
            connection: Rc::new(Connection::connect(addr, timeout)?),
        })
    }

    /// The underlying connection, shared with every proxy this factory
    /// created.
    pub fn connection(&self) -> Rc<Connection> {
        Rc::clone(&self.connection)
    }

    /// Closes the underlying connection, invalidating every proxy of this
    /// factory at once.
    pub fn close(&self) {
        self.connection.close();
    }
}

impl Factory for RemoteFactory {
    type Kb = RemoteKnowledgebase;
    type Alg = RemoteLearner;
    type Logger = RemoteLogger;

    fn create_knowledgebase(&self) -> Result<RemoteKnowledgebase, Error> {
        let payload = self
            .connection
            .call(Opcode::CreateKnowledgebase, 0, Vec::new())?;
        Ok(RemoteKnowledgebase {
            connection: Rc::clone(&self.connection),
            handle: parse_handle(&payload)?,
        })
    }

    fn create_learning_algorithm(
        &self,
        spec: AlgorithmSpec,
        kb: &RemoteKnowledgebase,
    ) -> Result<RemoteLearner, Error> {
        if !Rc::ptr_eq(&self.connection, &kb.connection) {
            return Err(Error::Argument(
                "knowledgebase belongs to a different connection".to_string(),
            ));
        }
        let mut payload = Vec::new();
        codec::put_u8(&mut payload, spec.kind().code());
        codec::put_u32(&mut payload, spec.alphabet_size());
        codec::put_u32(&mut payload, kb.handle);
        let response = self.connection.call(Opcode::CreateLearner, 0, payload)?;
        Ok(RemoteLearner {
            connection: Rc::clone(&self.connection),
            handle: parse_handle(&response)?,
        })
    }

    fn create_logger(&self) -> Result<RemoteLogger, Error> {
        let payload = self.connection.call(Opcode::CreateLogger, 0, Vec::new())?;
        Ok(RemoteLogger {
            connection: Rc::clone(&self.connection),
            handle: parse_handle(&payload)?,
        })
    }
}

/// Releases a proxy's server-side object when the proxy is dropped, unless
/// the connection is already gone.
fn release_on_drop(connection: &Connection, handle: u32) {
    if !connection.is_closed() {
        let _ = connection.call(Opcode::Release, handle, Vec::new());
    }
}

/// Proxy for a server-side knowledgebase. Holds only the connection and the
/// handle, no state is mirrored locally.
pub struct RemoteKnowledgebase {
    connection: Rc<Connection>,
    handle: u32,
}

impl RemoteKnowledgebase {
    pub fn handle(&self) -> u32 {
        self.handle
    }
}

impl Knowledgebase for RemoteKnowledgebase {
    fn add_knowledge(&self, word: &Word, accept: bool) -> Result<(), Error> {
        let mut payload = Vec::new();
        codec::put_word(&mut payload, word);
        codec::put_u8(&mut payload, accept as u8);
        let response = self
            .connection
            .call(Opcode::KbAddKnowledge, self.handle, payload)?;
        expect_empty(&response)
    }

    fn resolve_or_add_query(&self, word: &Word) -> Result<Knowledge, Error> {
        let mut payload = Vec::new();
        codec::put_word(&mut payload, word);
        let response = self
            .connection
            .call(Opcode::KbResolveOrAddQuery, self.handle, payload)?;
        let mut cursor = Reader::new(&response);
        let code = cursor.u8().map_err(proxy_error)?;
        cursor.expect_end().map_err(proxy_error)?;
        Knowledge::from_code(code)
            .ok_or_else(|| Error::Protocol(format!("unknown status byte {code}")))
    }

    fn get_queries(&self) -> Result<Vec<Word>, Error> {
        let response = self
            .connection
            .call(Opcode::KbGetQueries, self.handle, Vec::new())?;
        let mut cursor = Reader::new(&response);
        let count = cursor.u32().map_err(proxy_error)?;
        let words = (0..count)
            .map(|_| cursor.word())
            .collect::<Result<Vec<_>, _>>()
            .map_err(proxy_error)?;
        cursor.expect_end().map_err(proxy_error)?;
        Ok(words)
    }

    fn serialize(&self) -> Result<Vec<u8>, Error> {
        self.connection
            .call(Opcode::KbSerialize, self.handle, Vec::new())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<(), Error> {
        let response = self
            .connection
            .call(Opcode::KbDeserialize, self.handle, bytes.to_vec())?;
        expect_empty(&response)
    }

    fn clear(&self) -> Result<(), Error> {
        let response = self
            .connection
            .call(Opcode::KbClear, self.handle, Vec::new())?;
        expect_empty(&response)
    }
}

impl Drop for RemoteKnowledgebase {
    fn drop(&mut self) {
        release_on_drop(&self.connection, self.handle);
    }
}

/// Proxy for a server-side learner.
pub struct RemoteLearner {
    connection: Rc<Connection>,
    handle: u32,
}

impl RemoteLearner {
    pub fn handle(&self) -> u32 {
        self.handle
    }
}

impl LearningAlgorithm for RemoteLearner {
    type Logger = RemoteLogger;

    fn advance(&self) -> Result<Option<BasicAutomaton>, Error> {
        let response = self
            .connection
            .call(Opcode::AlgAdvance, self.handle, Vec::new())?;
        let mut cursor = Reader::new(&response);
        let tag = cursor.u8().map_err(proxy_error)?;
        match tag {
            0 => {
                cursor.expect_end().map_err(proxy_error)?;
                Ok(None)
            }
            1 => {
                let hypothesis = BasicAutomaton::decode(&mut cursor)?;
                cursor.expect_end().map_err(proxy_error)?;
                Ok(Some(hypothesis))
            }
            other => Err(Error::Protocol(format!(
                "unknown conjecture tag {other}"
            ))),
        }
    }

    fn add_counterexample(&self, word: &Word) -> Result<(), Error> {
        let mut payload = Vec::new();
        codec::put_word(&mut payload, word);
        let response = self
            .connection
            .call(Opcode::AlgAddCounterexample, self.handle, payload)?;
        expect_empty(&response)
    }

    fn set_logger(&self, logger: &RemoteLogger) -> Result<(), Error> {
        if !Rc::ptr_eq(&self.connection, &logger.connection) {
            return Err(Error::Argument(
                "logger belongs to a different connection".to_string(),
            ));
        }
        let mut payload = Vec::new();
        codec::put_u32(&mut payload, logger.handle);
        let response = self
            .connection
            .call(Opcode::AlgSetLogger, self.handle, payload)?;
        expect_empty(&response)
    }

    fn remove_logger(&self) -> Result<(), Error> {
        let response = self
            .connection
            .call(Opcode::AlgRemoveLogger, self.handle, Vec::new())?;
        expect_empty(&response)
    }
}

impl Drop for RemoteLearner {
    fn drop(&mut self) {
        release_on_drop(&self.connection, self.handle);
    }
}

/// Proxy for a server-side logger.
pub struct RemoteLogger {
    connection: Rc<Connection>,
    handle: u32,
}

impl RemoteLogger {
    pub fn handle(&self) -> u32 {
        self.handle
    }
}

impl Logger for RemoteLogger {
    fn receive_and_flush(&self) -> Result<String, Error> {
        let payload = self
            .connection
            .call(Opcode::LoggerReceiveAndFlush, self.handle, Vec::new())?;
        String::from_utf8(payload)
            .map_err(|_| Error::Protocol("log text is not valid utf-8".to_string()))
    }
}

impl Drop for RemoteLogger {
    fn drop(&mut self) {
        release_on_drop(&self.connection, self.handle);
    }
}
