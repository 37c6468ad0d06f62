//! Weighted consistent hashing over a virtual-node ring.
//!
//! A [`ConsistentHash`] maps request keys onto a dynamically changing set
//! of nodes. Every node occupies `replicas` positions on the ring (scaled
//! by weight), so that adding or removing one node only remaps the keys
//! that fell on its positions.
//!
//! Node identity is the node's [`Display`] rendering: it must be stable
//! across runs and is used both for placement and for membership checks.
//! Changing a node type's `Display` between versions invalidates routing.
//!
//! The default position hash is FNV-1a (64-bit); callers may inject any
//! deterministic, uniformly distributed hash function instead.

use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Display},
};

use parking_lot::RwLock;

/// Hash function mapping raw bytes onto ring positions.
pub type HashFn = Box<dyn Fn(&[u8]) -> u64 + Send + Sync>;

/// Minimum virtual nodes per unit weight.
const MIN_REPLICAS: usize = 100;

/// Weight ceiling for [`ConsistentHash::add_with_weight`].
const TOP_WEIGHT: usize = 100;

/// Textual tag mixed into the secondary hash that breaks placement
/// collisions deterministically.
const COLLISION_TAG: u64 = 16_777_619;

/// FNV-1a 64-bit hash.
#[must_use]
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Ring state guarded by the readers-writer lock.
struct Inner<N> {
    /// Ascending virtual-node positions. Duplicates are possible when two
    /// virtual nodes hash to the same position.
    keys: Vec<u64>,

    /// Position to real nodes. More than one entry means a placement
    /// collision; lookups break it with the secondary hash.
    ring: HashMap<u64, Vec<N>>,

    /// Display renderings of the nodes currently present.
    nodes: HashSet<String>,
}

/// A weighted consistent hash ring.
///
/// `get` takes the reader lock; membership changes take the writer lock.
/// All operations are total: `get` on an empty ring returns `None`.
///
/// # Example
///
/// ```
/// use meshguard::ConsistentHash;
///
/// let ring: ConsistentHash<String> = ConsistentHash::new();
/// ring.add("10.0.0.1:5000".to_owned());
/// ring.add("10.0.0.2:5000".to_owned());
///
/// let node = ring.get("user:42").unwrap();
/// assert!(ring.contains(&node));
/// ```
pub struct ConsistentHash<N> {
    hash_fn: HashFn,
    replicas: usize,
    inner: RwLock<Inner<N>>,
}

impl<N> ConsistentHash<N>
where
    N: Display + Clone,
{
    /// Creates a ring with the default replica count and FNV-1a hashing.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(MIN_REPLICAS, Box::new(fnv1a))
    }

    /// Creates a ring with a custom replica count and hash function.
    ///
    /// Replica counts below the default minimum are raised to it; too few
    /// virtual nodes makes the key distribution lumpy.
    #[must_use]
    pub fn with_options(replicas: usize, hash_fn: HashFn) -> Self {
        Self {
            hash_fn,
            replicas: replicas.max(MIN_REPLICAS),
            inner: RwLock::new(Inner {
                keys: Vec::new(),
                ring: HashMap::new(),
                nodes: HashSet::new(),
            }),
        }
    }

    /// Adds `node` with the ring's full replica count.
    ///
    /// Re-adding a node first removes it, so the new placement is
    /// authoritative.
    pub fn add(&self, node: N) {
        self.add_with_replicas(node, self.replicas);
    }

    /// Adds `node` with an explicit number of virtual positions, clamped
    /// to `[1, default]`.
    pub fn add_with_replicas(&self, node: N, replicas: usize) {
        // A re-add must not leave stale virtual positions behind.
        self.remove(&node);

        let replicas = replicas.clamp(1, self.replicas);
        let node_repr = node.to_string();

        let mut inner = self.inner.write();
        inner.nodes.insert(node_repr.clone());
        for i in 0..replicas {
            let hash = (self.hash_fn)(format!("{node_repr}{i}").as_bytes());
            inner.keys.push(hash);
            inner.ring.entry(hash).or_default().push(node.clone());
        }
        inner.keys.sort_unstable();

        tracing::debug!(node = %node_repr, replicas, "consistent hash node added");
    }

    /// Adds `node` with `weight` percent of the full replica count.
    ///
    /// Weights above 100 are harmless: the replica clamp applies.
    pub fn add_with_weight(&self, node: N, weight: usize) {
        let replicas = self.replicas * weight / TOP_WEIGHT;
        self.add_with_replicas(node, replicas);
    }

    /// Removes `node` and every one of its virtual positions.
    pub fn remove(&self, node: &N) {
        let node_repr = node.to_string();

        let mut inner = self.inner.write();
        if !inner.nodes.contains(&node_repr) {
            return;
        }

        let Inner { keys, ring, nodes } = &mut *inner;
        for i in 0..self.replicas {
            let hash = (self.hash_fn)(format!("{node_repr}{i}").as_bytes());
            let Some(bucket) = ring.get_mut(&hash) else {
                continue;
            };

            let before = bucket.len();
            bucket.retain(|candidate| candidate.to_string() != node_repr);
            let scrubbed = before - bucket.len();
            if bucket.is_empty() {
                ring.remove(&hash);
            }

            // Drop one position per scrubbed entry, and only on an exact
            // match: the nearest neighbor belongs to another node. A
            // position shared by several virtual nodes appears that many
            // times in `keys`.
            for _ in 0..scrubbed {
                if let Ok(index) = keys.binary_search(&hash) {
                    keys.remove(index);
                }
            }
        }
        nodes.remove(&node_repr);

        tracing::debug!(node = %node_repr, "consistent hash node removed");
    }

    /// Maps `key` to a node, or `None` if the ring is empty.
    pub fn get<K>(&self, key: K) -> Option<N>
    where
        K: Display,
    {
        let inner = self.inner.read();
        if inner.keys.is_empty() {
            return None;
        }

        let key_repr = key.to_string();
        let hash = (self.hash_fn)(key_repr.as_bytes());

        // Smallest position at or after the key's hash, wrapping so the
        // ring is cyclic.
        let index = inner.keys.partition_point(|&position| position < hash) % inner.keys.len();
        let bucket = inner.ring.get(&inner.keys[index])?;

        match bucket.as_slice() {
            [] => None,
            [node] => Some(node.clone()),
            collided => {
                // Placement collision: pick deterministically by a
                // secondary hash so the same key always lands on the same
                // node.
                let secondary = (self.hash_fn)(format!("{COLLISION_TAG}:{key_repr}").as_bytes());
                let position = secondary % collided.len() as u64;
                Some(collided[position as usize].clone())
            }
        }
    }

    /// Returns true if `node` is currently present.
    #[must_use]
    pub fn contains(&self, node: &N) -> bool {
        self.inner.read().nodes.contains(&node.to_string())
    }

    /// Number of real nodes currently present.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Returns true if no nodes are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }
}

impl<N> Default for ConsistentHash<N>
where
    N: Display + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<N> fmt::Debug for ConsistentHash<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ConsistentHash")
            .field("replicas", &self.replicas)
            .field("nodes", &inner.nodes.len())
            .field("positions", &inner.keys.len())
            .finish()
    }
}
