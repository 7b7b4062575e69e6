//! The learning-algorithm driver. A [`Learner`] alternates between two
//! phases: it either needs membership queries answered into its bound
//! knowledgebase, or it is ready to produce a conjecture. Counterexamples
//! from an equivalence oracle push it back into the query phase. The actual
//! inference is delegated to a pluggable [`LearningStrategy`].

use std::{cell::RefCell, fmt, rc::Rc};

use tracing::{debug, info};

use crate::{
    automaton::BasicAutomaton,
    error::Error,
    knowledge::KnowledgeStore,
    logger::SharedLogBuffer,
    word::Word,
};

mod angluin;
pub use angluin::AngluinTable;

/// The driver phases. `Terminated` is declared by a strategy that can make
/// no further progress; for the bundled table learner this never happens,
/// the loop normally ends with the caller accepting a conjecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NeedsQueries,
    ReadyToConjecture,
    Terminated,
}

/// The closed enumeration of algorithm kinds, with fixed codes for the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmKind {
    Angluin,
    BiermannOriginal,
}

impl AlgorithmKind {
    pub fn code(self) -> u8 {
        match self {
            AlgorithmKind::Angluin => 1,
            AlgorithmKind::BiermannOriginal => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AlgorithmKind::Angluin),
            2 => Some(AlgorithmKind::BiermannOriginal),
            _ => None,
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmKind::Angluin => write!(f, "angluin"),
            AlgorithmKind::BiermannOriginal => write!(f, "biermann-original"),
        }
    }
}

/// An algorithm kind together with its kind-specific constructor arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmSpec {
    Angluin { alphabet_size: u32 },
    BiermannOriginal { alphabet_size: u32 },
}

impl AlgorithmSpec {
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            AlgorithmSpec::Angluin { .. } => AlgorithmKind::Angluin,
            AlgorithmSpec::BiermannOriginal { .. } => AlgorithmKind::BiermannOriginal,
        }
    }

    pub fn alphabet_size(&self) -> u32 {
        match *self {
            AlgorithmSpec::Angluin { alphabet_size }
            | AlgorithmSpec::BiermannOriginal { alphabet_size } => alphabet_size,
        }
    }
}

/// The contract between the driver and a concrete inference strategy.
///
/// A strategy never answers membership queries itself. It poses them through
/// [`KnowledgeStore::resolve_or_add_query`] and works with whatever portion
/// is resolved; resolved knowledge is never mutated by the strategy.
pub trait LearningStrategy {
    /// Attempts to produce a hypothesis from the currently resolved
    /// knowledge. Returns `None` when unresolved queries block progress, in
    /// which case the caller must answer the knowledgebase's pending
    /// queries and try again.
    fn conjecture(&mut self, kb: &mut KnowledgeStore) -> Result<Option<BasicAutomaton>, Error>;

    /// Incorporates a counterexample from the symmetric difference between
    /// the last hypothesis and the target language.
    fn process_counterexample(&mut self, word: &Word, kb: &mut KnowledgeStore)
        -> Result<(), Error>;

    /// Whether the strategy has declared that no further progress is
    /// possible. Rarely overridden.
    fn terminated(&self) -> bool {
        false
    }
}

/// The driver state machine binding a strategy to exactly one knowledgebase.
pub struct Learner {
    spec: AlgorithmSpec,
    strategy: Box<dyn LearningStrategy>,
    kb: Rc<RefCell<KnowledgeStore>>,
    phase: Phase,
    conjectured: bool,
    log: Option<SharedLogBuffer>,
}

impl Learner {
    /// Constructs a learner for the given spec, bound to `kb`. Kinds without
    /// a bundled strategy are rejected; external strategy implementations
    /// enter through [`Learner::with_strategy`].
    pub fn new(spec: AlgorithmSpec, kb: Rc<RefCell<KnowledgeStore>>) -> Result<Self, Error> {
        if spec.alphabet_size() == 0 {
            return Err(Error::Argument(
                "alphabet size must be at least one".to_string(),
            ));
        }
        let strategy: Box<dyn LearningStrategy> = match spec {
            AlgorithmSpec::Angluin { alphabet_size } => {
                Box::new(AngluinTable::new(alphabet_size))
            }
            other => {
                return Err(Error::Argument(format!(
                    "no bundled strategy for algorithm kind `{}`",
                    other.kind()
                )))
            }
        };
        Ok(Self::with_strategy(spec, kb, strategy))
    }

    /// Constructs a learner around an externally provided strategy.
    pub fn with_strategy(
        spec: AlgorithmSpec,
        kb: Rc<RefCell<KnowledgeStore>>,
        strategy: Box<dyn LearningStrategy>,
    ) -> Self {
        debug!("creating {} learner", spec.kind());
        Self {
            spec,
            strategy,
            kb,
            phase: Phase::NeedsQueries,
            conjectured: false,
            log: None,
        }
    }

    pub fn spec(&self) -> AlgorithmSpec {
        self.spec
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// A handle on the bound knowledgebase.
    pub fn knowledgebase(&self) -> Rc<RefCell<KnowledgeStore>> {
        Rc::clone(&self.kb)
    }

    /// Either returns the next conjecture or `None`, in which case the
    /// bound knowledgebase now holds pending queries that must be answered
    /// via an external membership oracle before calling `advance` again.
    pub fn advance(&mut self) -> Result<Option<BasicAutomaton>, Error> {
        if self.strategy.terminated() {
            self.phase = Phase::Terminated;
            self.emit("strategy reports no further progress is possible");
            return Ok(None);
        }

        let conjecture = {
            let mut kb = self.kb.borrow_mut();
            self.strategy.conjecture(&mut kb)?
        };
        match conjecture {
            None => {
                self.phase = Phase::NeedsQueries;
                let outstanding = self.kb.borrow().pending_count();
                debug!("advance blocked on {outstanding} membership queries");
                self.emit(format!("awaiting {outstanding} membership queries"));
                Ok(None)
            }
            Some(hypothesis) => {
                self.phase = Phase::ReadyToConjecture;
                self.conjectured = true;
                info!(
                    "conjecturing hypothesis with {} states",
                    hypothesis.state_count()
                );
                self.emit(format!(
                    "conjectured hypothesis with {} states",
                    hypothesis.state_count()
                ));
                Ok(Some(hypothesis))
            }
        }
    }

    /// Feeds back a word from the symmetric difference between the last
    /// hypothesis and the target. Only valid once a hypothesis has been
    /// produced.
    pub fn add_counterexample(&mut self, word: &Word) -> Result<(), Error> {
        if !self.conjectured {
            return Err(Error::Argument(
                "counterexample before any conjecture was produced".to_string(),
            ));
        }
        if !word.within_alphabet(self.spec.alphabet_size()) {
            return Err(Error::Argument(format!(
                "counterexample {word} uses symbols outside the alphabet of size {}",
                self.spec.alphabet_size()
            )));
        }

        {
            let mut kb = self.kb.borrow_mut();
            self.strategy.process_counterexample(word, &mut kb)?;
        }
        self.phase = Phase::NeedsQueries;
        self.emit(format!("processed counterexample {word}"));
        Ok(())
    }

    /// Attaches a log buffer. At most one is attached at a time; attaching
    /// replaces the previous one without draining it.
    pub fn set_logger(&mut self, log: SharedLogBuffer) {
        self.log = Some(log);
    }

    /// Detaches the current log buffer, if any. Entries already emitted
    /// stay in the buffer.
    pub fn remove_logger(&mut self) {
        self.log = None;
    }

    fn emit(&self, entry: impl Into<String>) {
        if let Some(log) = &self.log {
            log.borrow_mut().append(entry);
        }
    }
}

impl fmt::Debug for Learner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Learner")
            .field("kind", &self.spec.kind())
            .field("phase", &self.phase)
            .field("conjectured", &self.conjectured)
            .finish()
    }
}
