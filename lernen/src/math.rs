//! Type aliases for the collection types used throughout the crate. We use
//! these to hide which concrete implementations are actually in play.

use std::collections::{BTreeMap, BTreeSet};

pub use indexmap::Equivalent;

/// Type alias for maps, we use this to hide which type of `HashMap` we are actually using.
pub type Map<K, V> = indexmap::IndexMap<K, V>;
/// Type alias for sets that preserve insertion order.
pub type Set<S> = indexmap::IndexSet<S>;

/// Type alias for maps with a deterministic key ordering.
pub type OrderedMap<K, V> = BTreeMap<K, V>;
/// Type alias for sets with a deterministic element ordering.
pub type OrderedSet<S> = BTreeSet<S>;

/// Represents a bijective mapping between `L` and `R`, that is a mapping which associates
/// each `L` with precisely one `R` and vice versa.
pub type Bijection<L, R> = bimap::BiBTreeMap<L, R>;
