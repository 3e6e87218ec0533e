use std::collections::HashMap;
use std::collections::HashSet;

#[cfg(feature = "test")]
pub mod test;

pub type FastHashMap<K, V> = HashMap<K, V, ahash::RandomState>;
pub type FastHashSet<K> = HashSet<K, ahash::RandomState>;
