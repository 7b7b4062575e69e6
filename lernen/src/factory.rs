//! The uniform object interface over which learning runs, regardless of
//! whether the engine lives in-process or behind a dispatcher connection. A
//! [`Factory`] hands out knowledgebases, learners and loggers; the local
//! implementations below share their state through `Rc<RefCell<..>>`, the
//! dispatcher crate provides proxy implementations over a connection.

use std::{cell::RefCell, rc::Rc};

use tracing::debug;

use crate::{
    algorithm::{AlgorithmSpec, Learner},
    automaton::BasicAutomaton,
    error::Error,
    knowledge::{Knowledge, KnowledgeStore},
    logger::{LogBuffer, SharedLogBuffer},
    word::Word,
};

/// The query-cache interface. Local implementations cannot fail on most of
/// these calls; the signatures carry `Result` so dispatcher-backed
/// implementations can surface connection and protocol failures through the
/// same interface.
pub trait Knowledgebase {
    fn add_knowledge(&self, word: &Word, accept: bool) -> Result<(), Error>;
    fn resolve_or_add_query(&self, word: &Word) -> Result<Knowledge, Error>;
    fn get_queries(&self) -> Result<Vec<Word>, Error>;
    fn serialize(&self) -> Result<Vec<u8>, Error>;
    fn deserialize(&self, bytes: &[u8]) -> Result<(), Error>;
    fn clear(&self) -> Result<(), Error>;
}

/// The driver interface, see [`Learner`] for the semantics of the calls.
pub trait LearningAlgorithm {
    type Logger: Logger;

    fn advance(&self) -> Result<Option<BasicAutomaton>, Error>;
    fn add_counterexample(&self, word: &Word) -> Result<(), Error>;
    fn set_logger(&self, logger: &Self::Logger) -> Result<(), Error>;
    fn remove_logger(&self) -> Result<(), Error>;
}

/// The diagnostic-sink interface.
pub trait Logger {
    /// Atomically drains all buffered entries.
    fn receive_and_flush(&self) -> Result<String, Error>;
}

/// Hands out the three object kinds with a uniform interface. A learner is
/// bound to exactly one knowledgebase of the same factory at construction.
pub trait Factory {
    type Kb: Knowledgebase;
    type Alg: LearningAlgorithm<Logger = Self::Logger>;
    type Logger: Logger;

    fn create_knowledgebase(&self) -> Result<Self::Kb, Error>;
    fn create_learning_algorithm(
        &self,
        spec: AlgorithmSpec,
        kb: &Self::Kb,
    ) -> Result<Self::Alg, Error>;
    fn create_logger(&self) -> Result<Self::Logger, Error>;
}

/// The in-process factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFactory;

impl LocalFactory {
    pub fn new() -> Self {
        Self
    }
}

/// A shared handle on an in-process [`KnowledgeStore`].
#[derive(Debug, Clone, Default)]
pub struct LocalKnowledgebase {
    store: Rc<RefCell<KnowledgeStore>>,
}

impl LocalKnowledgebase {
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying store, shared with any learner bound to this
    /// knowledgebase.
    pub fn store(&self) -> Rc<RefCell<KnowledgeStore>> {
        Rc::clone(&self.store)
    }
}

impl Knowledgebase for LocalKnowledgebase {
    fn add_knowledge(&self, word: &Word, accept: bool) -> Result<(), Error> {
        self.store.borrow_mut().add_knowledge(word, accept);
        Ok(())
    }

    fn resolve_or_add_query(&self, word: &Word) -> Result<Knowledge, Error> {
        Ok(self.store.borrow_mut().resolve_or_add_query(word))
    }

    fn get_queries(&self) -> Result<Vec<Word>, Error> {
        Ok(self.store.borrow().queries())
    }

    fn serialize(&self) -> Result<Vec<u8>, Error> {
        Ok(self.store.borrow().serialize())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<(), Error> {
        self.store.borrow_mut().deserialize(bytes)
    }

    fn clear(&self) -> Result<(), Error> {
        self.store.borrow_mut().clear();
        Ok(())
    }
}

/// A shared handle on an in-process [`Learner`].
#[derive(Debug, Clone)]
pub struct LocalLearner {
    learner: Rc<RefCell<Learner>>,
}

impl LocalLearner {
    pub fn new(spec: AlgorithmSpec, kb: &LocalKnowledgebase) -> Result<Self, Error> {
        let learner = Learner::new(spec, kb.store())?;
        Ok(Self {
            learner: Rc::new(RefCell::new(learner)),
        })
    }
}

impl LearningAlgorithm for LocalLearner {
    type Logger = LocalLogger;

    fn advance(&self) -> Result<Option<BasicAutomaton>, Error> {
        self.learner.borrow_mut().advance()
    }

    fn add_counterexample(&self, word: &Word) -> Result<(), Error> {
        self.learner.borrow_mut().add_counterexample(word)
    }

    fn set_logger(&self, logger: &LocalLogger) -> Result<(), Error> {
        self.learner.borrow_mut().set_logger(logger.buffer());
        Ok(())
    }

    fn remove_logger(&self) -> Result<(), Error> {
        self.learner.borrow_mut().remove_logger();
        Ok(())
    }
}

/// A shared handle on an in-process [`LogBuffer`].
#[derive(Debug, Clone, Default)]
pub struct LocalLogger {
    buffer: SharedLogBuffer,
}

impl LocalLogger {
    pub fn new() -> Self {
        Self {
            buffer: LogBuffer::shared(),
        }
    }

    pub fn buffer(&self) -> SharedLogBuffer {
        Rc::clone(&self.buffer)
    }
}

impl Logger for LocalLogger {
    fn receive_and_flush(&self) -> Result<String, Error> {
        Ok(self.buffer.borrow_mut().receive_and_flush())
    }
}

impl Factory for LocalFactory {
    type Kb = LocalKnowledgebase;
    type Alg = LocalLearner;
    type Logger = LocalLogger;

    fn create_knowledgebase(&self) -> Result<LocalKnowledgebase, Error> {
        debug!("creating local knowledgebase");
        Ok(LocalKnowledgebase::new())
    }

    fn create_learning_algorithm(
        &self,
        spec: AlgorithmSpec,
        kb: &LocalKnowledgebase,
    ) -> Result<LocalLearner, Error> {
        LocalLearner::new(spec, kb)
    }

    fn create_logger(&self) -> Result<LocalLogger, Error> {
        Ok(LocalLogger::new())
    }
}

#[cfg(test)]
mod tests {
    use super::{Factory, Knowledgebase, LearningAlgorithm, LocalFactory, Logger};
    use crate::{algorithm::AlgorithmSpec, automaton::Dfa, knowledge::Knowledge, word::Word};

    #[test]
    fn factory_objects_share_state_with_the_learner() {
        let factory = LocalFactory::new();
        let kb = factory.create_knowledgebase().unwrap();
        let learner = factory
            .create_learning_algorithm(AlgorithmSpec::Angluin { alphabet_size: 2 }, &kb)
            .unwrap();

        // the learner's first advance posts queries into the shared store
        assert!(learner.advance().unwrap().is_none());
        assert!(!kb.get_queries().unwrap().is_empty());
    }

    #[test]
    fn full_learning_loop_through_the_trait_interface() {
        let target = |w: &Word| w.len() % 3 == 0;
        let factory = LocalFactory::new();
        let kb = factory.create_knowledgebase().unwrap();
        let learner = factory
            .create_learning_algorithm(AlgorithmSpec::Angluin { alphabet_size: 2 }, &kb)
            .unwrap();
        let logger = factory.create_logger().unwrap();
        learner.set_logger(&logger).unwrap();

        let mut words = vec![Word::empty()];
        let mut frontier = vec![Word::empty()];
        for _ in 0..6 {
            let mut next = Vec::new();
            for w in &frontier {
                for s in 0..2 {
                    let ext = w.extended(s);
                    words.push(ext.clone());
                    next.push(ext);
                }
            }
            frontier = next;
        }

        let mut accepted = None;
        for _ in 0..64 {
            match learner.advance().unwrap() {
                None => {
                    for query in kb.get_queries().unwrap() {
                        kb.add_knowledge(&query, target(&query)).unwrap();
                    }
                }
                Some(hypothesis) => {
                    let dfa = Dfa::try_from(&hypothesis).unwrap();
                    match words.iter().find(|w| dfa.accepts(w) != target(w)) {
                        Some(cex) => learner.add_counterexample(cex).unwrap(),
                        None => {
                            accepted = Some(dfa);
                            break;
                        }
                    }
                }
            }
        }

        let dfa = accepted.expect("learning did not converge");
        assert_eq!(dfa.size(), 3);
        assert!(!logger.receive_and_flush().unwrap().is_empty());
    }

    #[test]
    fn knowledgebase_trait_round_trip() {
        let factory = LocalFactory::new();
        let kb = factory.create_knowledgebase().unwrap();
        let w = Word::from([0, 1]);
        kb.add_knowledge(&w, true).unwrap();
        assert_eq!(kb.resolve_or_add_query(&w).unwrap(), Knowledge::Accept);

        let buf = kb.serialize().unwrap();
        kb.clear().unwrap();
        kb.deserialize(&buf).unwrap();
        assert_eq!(kb.resolve_or_add_query(&w).unwrap(), Knowledge::Accept);
    }
}
