//! An observation-table learner in the style of Angluin's L*. All membership
//! information flows through the bound knowledgebase, so the table itself
//! holds tri-state cells: a cell is accept, reject, or still pending at the
//! oracle.

use itertools::Itertools;
use tracing::{debug, trace};

use super::LearningStrategy;
use crate::{
    automaton::BasicAutomaton,
    error::Error,
    knowledge::{Knowledge, KnowledgeStore},
    math,
    word::Word,
};

const ITERATION_THRESHOLD: usize = if cfg!(debug_assertions) { 300 } else { 200000 };

type Row = Vec<Knowledge>;

/// The observation table. Rows are indexed by the minimal access words in
/// `base` and their one-letter extensions; columns are the experiment
/// suffixes. The empty experiment is mandatory and always sits at column
/// zero, its cell decides whether a row's state is final.
pub struct AngluinTable {
    alphabet_size: u32,
    // the minimal access words forming the base states
    base: Vec<Word>,
    // all known experiments
    experiments: Vec<Word>,
    // the most recently filled rows, for base words and their extensions
    rows: math::Map<Word, Row>,
}

impl AngluinTable {
    pub fn new(alphabet_size: u32) -> Self {
        Self {
            alphabet_size,
            base: vec![Word::empty()],
            experiments: vec![Word::empty()],
            rows: math::Map::default(),
        }
    }

    /// All words that index a row: the base and every one-letter extension
    /// of a base word that is not itself in the base.
    fn row_words(&self) -> impl Iterator<Item = Word> + '_ {
        self.base
            .iter()
            .flat_map(move |mr| {
                std::iter::once(mr.clone()).chain((0..self.alphabet_size).filter_map(move |a| {
                    let ext = mr.extended(a);
                    if !self.base.contains(&ext) {
                        Some(ext)
                    } else {
                        None
                    }
                }))
            })
            .unique()
    }

    /// Rebuilds every row from the knowledgebase, posing a query for each
    /// cell. Returns whether the table is complete, i.e. no cell is still
    /// pending. Incomplete rows are still filled to the end so that one
    /// round surfaces every outstanding query at once.
    fn fill(&mut self, kb: &mut KnowledgeStore) -> bool {
        let mut complete = true;
        let words = self.row_words().collect_vec();
        self.rows.clear();
        for mr in words {
            let row = self
                .experiments
                .iter()
                .map(|e| kb.resolve_or_add_query(&mr.concat(e)))
                .collect::<Row>();
            complete &= row.iter().all(|cell| cell.is_resolved());
            self.rows.insert(mr, row);
        }
        trace!("table filled, complete: {complete}\n{self:?}");
        complete
    }

    /// Extension rows whose contents match no base row. Each distinct such
    /// row must be promoted into the base before a hypothesis can be
    /// assembled.
    fn rows_to_promote(&self) -> Vec<Word> {
        let known = self
            .base
            .iter()
            .map(|mr| &self.rows[mr])
            .collect::<math::Set<_>>();
        let mut seen = math::Set::default();
        let mut out = Vec::new();

        for (word, row) in &self.rows {
            if self.base.contains(word) {
                continue;
            }
            if !known.contains(row) && seen.insert(row) {
                trace!("row of {word} matches no base row");
                out.push(word.clone());
            }
        }
        out
    }

    /// Builds the hypothesis automaton from a closed, complete table. One
    /// state per distinct base row; transitions follow the rows of the
    /// one-letter extensions.
    fn assemble(&self) -> Result<BasicAutomaton, Error> {
        let mut representatives = math::Bijection::<Word, u32>::new();
        let mut state_of_row = math::Map::<&Row, u32>::default();

        for mr in &self.base {
            let row = &self.rows[mr];
            if !state_of_row.contains_key(row) {
                let id = state_of_row.len() as u32;
                state_of_row.insert(row, id);
                representatives.insert(mr.clone(), id);
            }
        }

        let state_for = |word: &Word| -> Result<u32, Error> {
            let row = self
                .rows
                .get(word)
                .ok_or_else(|| Error::Internal(format!("no table row for {word}")))?;
            state_of_row.get(row).copied().ok_or_else(|| {
                Error::Internal(format!("table is not closed, row of {word} has no state"))
            })
        };

        let mut transitions = Vec::new();
        for (mr, &source) in representatives.iter() {
            for a in 0..self.alphabet_size {
                let target = state_for(&mr.extended(a))?;
                transitions.push((source, a, target));
            }
        }

        let finals = representatives
            .iter()
            .filter(|(mr, _)| self.rows[*mr][0] == Knowledge::Accept)
            .map(|(_, &id)| id)
            .collect_vec();
        let initial = state_for(&Word::empty())?;

        debug!(
            "assembling hypothesis with {} states, initial {initial}",
            state_of_row.len()
        );
        BasicAutomaton::new(
            state_of_row.len() as u32,
            [initial],
            finals,
            transitions,
        )
    }
}

impl LearningStrategy for AngluinTable {
    fn conjecture(&mut self, kb: &mut KnowledgeStore) -> Result<Option<BasicAutomaton>, Error> {
        let mut iteration = 0;
        loop {
            iteration += 1;
            if iteration > ITERATION_THRESHOLD {
                return Err(Error::Internal(format!(
                    "table did not close within {ITERATION_THRESHOLD} iterations"
                )));
            }

            if !self.fill(kb) {
                return Ok(None);
            }

            let todo = self.rows_to_promote();
            if todo.is_empty() {
                return self.assemble().map(Some);
            }
            debug!(
                "promoting rows: {}",
                todo.iter().map(Word::to_string).join(", ")
            );
            self.base.extend(todo);
        }
    }

    fn process_counterexample(
        &mut self,
        word: &Word,
        _kb: &mut KnowledgeStore,
    ) -> Result<(), Error> {
        if word.is_empty() {
            return Err(Error::Argument(
                "the empty word cannot act as a counterexample".to_string(),
            ));
        }
        for suffix in word.suffixes() {
            if !self.experiments.contains(&suffix) {
                trace!("adding experiment {suffix}");
                self.experiments.push(suffix);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for AngluinTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut builder = tabled::builder::Builder::default();
        let mut header = vec!["MR".to_string()];
        for e in &self.experiments {
            header.push(e.to_string());
        }
        builder.push_record(header);

        for mr in &self.base {
            let mut record = vec![mr.to_string()];
            if let Some(row) = self.rows.get(mr) {
                for cell in row {
                    record.push(
                        match cell {
                            Knowledge::Accept => "+",
                            Knowledge::Reject => "-",
                            Knowledge::Pending => "?",
                        }
                        .to_string(),
                    );
                }
            }
            builder.push_record(record);
        }

        write!(f, "{}", builder.build())
    }
}
