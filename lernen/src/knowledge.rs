//! The knowledgebase: a cache of membership-query answers together with the
//! set of queries that still await an answer from the oracle.

use tracing::trace;

use crate::{
    codec::{self, Reader},
    error::Error,
    math,
    word::Word,
};

/// The status a word can have inside a [`KnowledgeStore`]. A word is either
/// resolved (the oracle has classified it) or pending (somebody asked for it
/// and the answer is still outstanding). A single word never carries both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Knowledge {
    Reject,
    Accept,
    Pending,
}

impl Knowledge {
    pub fn from_label(accept: bool) -> Self {
        if accept {
            Knowledge::Accept
        } else {
            Knowledge::Reject
        }
    }

    /// The membership label, if `self` is resolved.
    pub fn label(self) -> Option<bool> {
        match self {
            Knowledge::Reject => Some(false),
            Knowledge::Accept => Some(true),
            Knowledge::Pending => None,
        }
    }

    pub fn is_resolved(self) -> bool {
        !matches!(self, Knowledge::Pending)
    }

    pub fn code(self) -> u8 {
        match self {
            Knowledge::Reject => 0,
            Knowledge::Accept => 1,
            Knowledge::Pending => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Knowledge::Reject),
            1 => Some(Knowledge::Accept),
            2 => Some(Knowledge::Pending),
            _ => None,
        }
    }
}

const MAGIC: u32 = 0x4c_45_4b_42;
const FORMAT_VERSION: u32 = 1;

/// A query cache mapping each known word to its [`Knowledge`] status. One map
/// holds resolved and pending entries alike, which makes "a word is never
/// pending and resolved at the same time" a structural property rather than
/// an invariant that needs policing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnowledgeStore {
    entries: math::Map<Word, Knowledge>,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the oracle's answer for `word`, overwriting any previous
    /// status. A pending entry for the same word is resolved by this.
    pub fn add_knowledge(&mut self, word: &Word, accept: bool) {
        let status = Knowledge::from_label(accept);
        trace!("recording {status:?} for {word}");
        self.entries.insert(word.clone(), status);
    }

    /// Looks up `word`, registering it as pending if it has no status yet.
    /// Repeated calls for the same unresolved word keep a single pending
    /// entry.
    pub fn resolve_or_add_query(&mut self, word: &Word) -> Knowledge {
        *self
            .entries
            .entry(word.clone())
            .or_insert_with(|| {
                trace!("registering pending query for {word}");
                Knowledge::Pending
            })
    }

    /// The status of `word`, without registering a query.
    pub fn status(&self, word: &Word) -> Option<Knowledge> {
        self.entries.get(word).copied()
    }

    /// A snapshot of all currently pending words. Does not mutate any
    /// status.
    pub fn queries(&self) -> Vec<Word> {
        self.entries
            .iter()
            .filter(|(_, status)| !status.is_resolved())
            .map(|(word, _)| word.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolved_count(&self) -> usize {
        self.entries.values().filter(|s| s.is_resolved()).count()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len() - self.resolved_count()
    }

    /// Drops every entry, resolved and pending.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Encodes the full status map. The encoding is deterministic: entries
    /// are sorted length-lexicographically by word, so two equal stores
    /// always produce identical buffers regardless of insertion history.
    /// Pending entries are included, see [`Self::deserialize`].
    pub fn serialize(&self) -> Vec<u8> {
        let mut sorted = self.entries.iter().collect::<Vec<_>>();
        sorted.sort_by(|(u, _), (v, _)| u.len().cmp(&v.len()).then_with(|| u.cmp(v)));

        let mut buf = Vec::new();
        codec::put_u32(&mut buf, MAGIC);
        codec::put_u32(&mut buf, FORMAT_VERSION);
        codec::put_u32(&mut buf, sorted.len() as u32);
        for (word, status) in sorted {
            codec::put_u8(&mut buf, status.code());
            codec::put_word(&mut buf, word);
        }
        buf
    }

    /// Replaces the entire store with the contents of `bytes`, restoring
    /// resolved knowledge and the pending-query set alike. On any decoding
    /// failure the store is left exactly as it was.
    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let mut reader = Reader::new(bytes);
        let mut entries = math::Map::default();

        let magic = reader.u32().map_err(format_error)?;
        if magic != MAGIC {
            return Err(Error::Format(format!(
                "bad magic `{magic:#010x}`, expected `{MAGIC:#010x}`"
            )));
        }
        let version = reader.u32().map_err(format_error)?;
        if version != FORMAT_VERSION {
            return Err(Error::Format(format!(
                "unsupported format version {version}"
            )));
        }

        let count = reader.u32().map_err(format_error)?;
        for _ in 0..count {
            let code = reader.u8().map_err(format_error)?;
            let status = Knowledge::from_code(code)
                .ok_or_else(|| Error::Format(format!("unknown status byte {code}")))?;
            let word = reader.word().map_err(format_error)?;
            if entries.insert(word.clone(), status).is_some() {
                return Err(Error::Format(format!("duplicate entry for {word}")));
            }
        }
        reader.expect_end().map_err(format_error)?;

        self.entries = entries;
        Ok(())
    }
}

fn format_error(err: crate::codec::CodecError) -> Error {
    Error::Format(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::{Knowledge, KnowledgeStore};
    use crate::word::Word;

    #[test]
    fn resolved_words_answer_and_leave_the_query_set() {
        let mut kb = KnowledgeStore::new();
        let w = Word::from([0, 1]);

        assert_eq!(kb.resolve_or_add_query(&w), Knowledge::Pending);
        assert_eq!(kb.queries(), vec![w.clone()]);

        kb.add_knowledge(&w, true);
        assert_eq!(kb.resolve_or_add_query(&w), Knowledge::Accept);
        assert!(kb.queries().is_empty());

        // overwriting is allowed and idempotent
        kb.add_knowledge(&w, false);
        kb.add_knowledge(&w, false);
        assert_eq!(kb.resolve_or_add_query(&w), Knowledge::Reject);
        assert_eq!(kb.len(), 1);
    }

    #[test]
    fn pending_entries_are_never_duplicated() {
        let mut kb = KnowledgeStore::new();
        let w = Word::from([2]);
        for _ in 0..5 {
            assert_eq!(kb.resolve_or_add_query(&w), Knowledge::Pending);
        }
        assert_eq!(kb.queries(), vec![w]);
        assert_eq!(kb.pending_count(), 1);
    }

    #[test]
    fn serialization_round_trips_through_clear() {
        let mut kb = KnowledgeStore::new();
        kb.add_knowledge(&Word::empty(), true);
        kb.add_knowledge(&Word::from([0]), false);
        kb.add_knowledge(&Word::from([1, 0]), true);
        kb.resolve_or_add_query(&Word::from([1, 1, 1]));

        let buf = kb.serialize();
        let snapshot = kb.clone();
        kb.clear();
        assert!(kb.is_empty());

        kb.deserialize(&buf).unwrap();
        assert_eq!(kb, snapshot);
        assert_eq!(kb.resolve_or_add_query(&Word::empty()), Knowledge::Accept);
        assert_eq!(kb.resolve_or_add_query(&Word::from([0])), Knowledge::Reject);
        // the pending set is part of the buffer
        assert_eq!(kb.queries(), vec![Word::from([1, 1, 1])]);
    }

    #[test]
    fn serialization_is_insertion_order_independent() {
        let mut left = KnowledgeStore::new();
        left.add_knowledge(&Word::from([0]), true);
        left.add_knowledge(&Word::from([1]), false);

        let mut right = KnowledgeStore::new();
        right.add_knowledge(&Word::from([1]), false);
        right.add_knowledge(&Word::from([0]), true);

        assert_eq!(left.serialize(), right.serialize());
    }

    #[test]
    fn corrupt_buffers_leave_the_store_untouched() {
        let mut kb = KnowledgeStore::new();
        kb.add_knowledge(&Word::from([0]), true);
        let snapshot = kb.clone();

        let good = kb.serialize();

        // truncation
        assert!(kb.deserialize(&good[..good.len() - 2]).is_err());
        assert_eq!(kb, snapshot);

        // trailing garbage
        let mut trailing = good.clone();
        trailing.push(0xff);
        assert!(kb.deserialize(&trailing).is_err());
        assert_eq!(kb, snapshot);

        // bad magic
        let mut bad_magic = good.clone();
        bad_magic[0] ^= 0xff;
        assert!(kb.deserialize(&bad_magic).is_err());
        assert_eq!(kb, snapshot);

        // unknown status byte
        let mut bad_status = good;
        bad_status[12] = 9;
        assert!(kb.deserialize(&bad_status).is_err());
        assert_eq!(kb, snapshot);
    }

    #[test]
    fn clear_removes_pending_and_resolved() {
        let mut kb = KnowledgeStore::new();
        kb.add_knowledge(&Word::from([0]), true);
        kb.resolve_or_add_query(&Word::from([1]));
        kb.clear();
        assert!(kb.is_empty());
        assert!(kb.queries().is_empty());
    }
}
