//! The automaton interchange model. A [`BasicAutomaton`] is the plain,
//! possibly nondeterministic shape in which hypotheses are handed around and
//! sent over the wire; a [`Dfa`] is the richer pointed representation that
//! supports membership testing.

use std::fmt;

use fixedbitset::FixedBitSet;

use crate::{
    codec::{self, CodecError, Reader},
    error::Error,
    math,
    word::{Symbol, Word},
};

/// A single transition tuple of a [`BasicAutomaton`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Transition {
    pub source: u32,
    pub label: Symbol,
    pub target: u32,
}

impl From<(u32, Symbol, u32)> for Transition {
    fn from((source, label, target): (u32, Symbol, u32)) -> Self {
        Self {
            source,
            label,
            target,
        }
    }
}

/// An automaton given explicitly by its state count, its initial and final
/// state indices and a list of labeled transitions. All indices are
/// validated against the state count on construction; an out-of-range index
/// is rejected rather than clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAutomaton {
    state_count: u32,
    initial: math::OrderedSet<u32>,
    finals: math::OrderedSet<u32>,
    transitions: Vec<Transition>,
}

impl BasicAutomaton {
    pub fn new<I, F, T>(
        state_count: u32,
        initial: I,
        finals: F,
        transitions: T,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = u32>,
        F: IntoIterator<Item = u32>,
        T: IntoIterator<Item = (u32, Symbol, u32)>,
    {
        let initial = initial.into_iter().collect::<math::OrderedSet<_>>();
        let finals = finals.into_iter().collect::<math::OrderedSet<_>>();
        let transitions = transitions
            .into_iter()
            .map(Transition::from)
            .collect::<Vec<_>>();

        if let Some(&state) = initial.iter().find(|&&q| q >= state_count) {
            return Err(Error::Argument(format!(
                "initial state {state} out of range, automaton has {state_count} states"
            )));
        }
        if let Some(&state) = finals.iter().find(|&&q| q >= state_count) {
            return Err(Error::Argument(format!(
                "final state {state} out of range, automaton has {state_count} states"
            )));
        }
        if let Some(t) = transitions
            .iter()
            .find(|t| t.source >= state_count || t.target >= state_count)
        {
            return Err(Error::Argument(format!(
                "transition ({}, {}, {}) out of range, automaton has {state_count} states",
                t.source, t.label, t.target
            )));
        }

        Ok(Self {
            state_count,
            initial,
            finals,
            transitions,
        })
    }

    pub fn state_count(&self) -> u32 {
        self.state_count
    }

    pub fn initial(&self) -> impl Iterator<Item = u32> + '_ {
        self.initial.iter().copied()
    }

    pub fn finals(&self) -> impl Iterator<Item = u32> + '_ {
        self.finals.iter().copied()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Appends the wire encoding of `self` to `buf`, using the shared codec
    /// conventions.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        codec::put_u32(buf, self.state_count);
        codec::put_u32(buf, self.initial.len() as u32);
        for &q in &self.initial {
            codec::put_u32(buf, q);
        }
        codec::put_u32(buf, self.finals.len() as u32);
        for &q in &self.finals {
            codec::put_u32(buf, q);
        }
        codec::put_u32(buf, self.transitions.len() as u32);
        for t in &self.transitions {
            codec::put_u32(buf, t.source);
            codec::put_u32(buf, t.label);
            codec::put_u32(buf, t.target);
        }
    }

    /// Decodes an automaton previously written by [`Self::encode`]. Index
    /// validation is re-run, so a buffer describing an inconsistent
    /// automaton is rejected.
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, Error> {
        fn index_list(reader: &mut Reader<'_>) -> Result<Vec<u32>, CodecError> {
            let len = reader.u32()? as usize;
            (0..len).map(|_| reader.u32()).collect()
        }

        let state_count = reader.u32().map_err(protocol_error)?;
        let initial = index_list(reader).map_err(protocol_error)?;
        let finals = index_list(reader).map_err(protocol_error)?;
        let transition_count = reader.u32().map_err(protocol_error)? as usize;
        let transitions = (0..transition_count)
            .map(|_| Ok((reader.u32()?, reader.u32()?, reader.u32()?)))
            .collect::<Result<Vec<_>, CodecError>>()
            .map_err(protocol_error)?;

        Self::new(state_count, initial, finals, transitions)
            .map_err(|err| Error::Protocol(format!("inconsistent automaton payload: {err}")))
    }
}

fn protocol_error(err: CodecError) -> Error {
    Error::Protocol(err.to_string())
}

/// A deterministic finite automaton with a single initial state, obtained
/// from a [`BasicAutomaton`] via [`TryFrom`]. Used for running words and by
/// the conformance tests around learning.
#[derive(Clone)]
pub struct Dfa {
    state_count: u32,
    initial: u32,
    finals: FixedBitSet,
    transitions: math::Map<(u32, Symbol), u32>,
}

impl TryFrom<&BasicAutomaton> for Dfa {
    type Error = Error;

    /// Fails if the automaton does not have exactly one initial state or if
    /// two transition tuples with the same source and label disagree on the
    /// target. Neither is silently repaired.
    fn try_from(automaton: &BasicAutomaton) -> Result<Self, Error> {
        let mut initial_states = automaton.initial();
        let initial = match (initial_states.next(), initial_states.next()) {
            (Some(q), None) => q,
            _ => {
                return Err(Error::Argument(format!(
                    "expected exactly one initial state, got {}",
                    automaton.initial.len()
                )))
            }
        };

        let mut finals = FixedBitSet::with_capacity(automaton.state_count as usize);
        for q in automaton.finals() {
            finals.insert(q as usize);
        }

        let mut transitions = math::Map::default();
        for t in automaton.transitions() {
            if let Some(&previous) = transitions.get(&(t.source, t.label)) {
                if previous != t.target {
                    return Err(Error::Argument(format!(
                        "nondeterministic transitions from state {} on symbol {}",
                        t.source, t.label
                    )));
                }
            }
            transitions.insert((t.source, t.label), t.target);
        }

        Ok(Self {
            state_count: automaton.state_count,
            initial,
            finals,
            transitions,
        })
    }
}

impl Dfa {
    pub fn size(&self) -> u32 {
        self.state_count
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }

    pub fn is_final(&self, state: u32) -> bool {
        self.finals.contains(state as usize)
    }

    /// Runs `word` from the initial state. A missing transition rejects; the
    /// word is accepted iff the reached state is final.
    pub fn accepts(&self, word: &Word) -> bool {
        let mut current = self.initial;
        for symbol in word.symbols() {
            match self.transitions.get(&(current, symbol)) {
                Some(&next) => current = next,
                None => return false,
            }
        }
        self.is_final(current)
    }
}

impl fmt::Debug for Dfa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dfa")
            .field("states", &self.state_count)
            .field("initial", &self.initial)
            .field("finals", &self.finals.ones().collect::<Vec<_>>())
            .field("transitions", &self.transitions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{BasicAutomaton, Dfa};
    use crate::{codec::Reader, error::Error, word::Word};

    fn mod3_counter() -> BasicAutomaton {
        BasicAutomaton::new(
            3,
            [0],
            [0],
            [
                (0, 0, 1),
                (0, 1, 1),
                (1, 0, 2),
                (1, 1, 2),
                (2, 0, 0),
                (2, 1, 0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn indices_are_validated() {
        assert!(matches!(
            BasicAutomaton::new(2, [2], [], []),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            BasicAutomaton::new(2, [0], [5], []),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            BasicAutomaton::new(2, [0], [1], [(0, 0, 2)]),
            Err(Error::Argument(_))
        ));
    }

    #[test]
    fn conversion_requires_exactly_one_initial_state() {
        let two_initial = BasicAutomaton::new(2, [0, 1], [0], []).unwrap();
        assert!(matches!(
            Dfa::try_from(&two_initial),
            Err(Error::Argument(_))
        ));

        let none_initial = BasicAutomaton::new(2, [], [0], []).unwrap();
        assert!(matches!(
            Dfa::try_from(&none_initial),
            Err(Error::Argument(_))
        ));
    }

    #[test]
    fn conversion_rejects_conflicting_transitions() {
        let nondet =
            BasicAutomaton::new(2, [0], [0], [(0, 0, 0), (0, 0, 1)]).unwrap();
        assert!(matches!(Dfa::try_from(&nondet), Err(Error::Argument(_))));

        // a duplicate of the same tuple is harmless
        let duplicated =
            BasicAutomaton::new(2, [0], [0], [(0, 0, 1), (0, 0, 1)]).unwrap();
        assert!(Dfa::try_from(&duplicated).is_ok());
    }

    #[test]
    fn membership_follows_transitions() {
        let dfa = Dfa::try_from(&mod3_counter()).unwrap();
        assert!(dfa.accepts(&Word::empty()));
        assert!(!dfa.accepts(&Word::from([0])));
        assert!(!dfa.accepts(&Word::from([0, 1])));
        assert!(dfa.accepts(&Word::from([0, 1, 0])));
        assert!(dfa.accepts(&Word::from([1, 1, 1, 0, 0, 0])));
    }

    #[test]
    fn missing_transitions_reject() {
        let partial = BasicAutomaton::new(2, [0], [1], [(0, 0, 1)]).unwrap();
        let dfa = Dfa::try_from(&partial).unwrap();
        assert!(dfa.accepts(&Word::from([0])));
        assert!(!dfa.accepts(&Word::from([1])));
        assert!(!dfa.accepts(&Word::from([0, 0])));
    }

    #[test]
    fn wire_encoding_round_trips() {
        let automaton = mod3_counter();
        let mut buf = Vec::new();
        automaton.encode(&mut buf);
        let mut reader = Reader::new(&buf);
        let decoded = BasicAutomaton::decode(&mut reader).unwrap();
        reader.expect_end().unwrap();
        assert_eq!(decoded, automaton);
    }

    #[test]
    fn decode_rejects_inconsistent_payloads() {
        let automaton = BasicAutomaton::new(1, [0], [0], []).unwrap();
        let mut buf = Vec::new();
        automaton.encode(&mut buf);
        // raise the encoded initial index beyond the state count
        buf[11] = 7;
        let mut reader = Reader::new(&buf);
        assert!(matches!(
            BasicAutomaton::decode(&mut reader),
            Err(Error::Protocol(_))
        ));
    }
}
