//! Sharded LRU block cache with a high-priority pool
//!
//! Each shard keeps two recency lists. High-priority entries (index and
//! filter blocks, when configured) live in their own pool of
//! `high_pri_pool_ratio * capacity` bytes; when that pool overflows its
//! oldest entries are demoted to the low-priority list. Eviction always
//! takes the oldest low-priority entry first.

use crate::sstable::{BloomFilter, DataBlock, IndexBlock};
use crate::types::FileNumber;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const MIN_SHARD_BYTES: u64 = 512 * 1024;
const MAX_AUTO_SHARD_BITS: i32 = 6;

/// Block cache configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheOptions {
    /// Total capacity in bytes
    pub capacity: u64,
    /// log2 of the shard count; negative picks from capacity
    pub num_shard_bits: i32,
    /// Refuse inserts that can never fit instead of overshooting
    pub strict_capacity_limit: bool,
    /// Share of capacity reserved for high-priority entries
    pub high_pri_pool_ratio: f64,
}

impl CacheOptions {
    /// Options with automatic sharding and no high-priority pool
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            num_shard_bits: -1,
            strict_capacity_limit: false,
            high_pri_pool_ratio: 0.0,
        }
    }
}

/// Kind of block held in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Data,
    Index,
    Filter,
}

/// Identity of a cached block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub file: FileNumber,
    pub offset: u64,
    pub kind: BlockKind,
}

impl CacheKey {
    pub fn new(file: FileNumber, offset: u64, kind: BlockKind) -> Self {
        Self { file, offset, kind }
    }

    fn shard_hash(&self) -> u64 {
        let mut h = self.file.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ self.offset;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^= h >> 33;
        h
    }
}

/// Insertion priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

/// A cached block
#[derive(Debug, Clone)]
pub enum CachedBlock {
    Data(Arc<DataBlock>),
    Index(Arc<IndexBlock>),
    Filter(Arc<BloomFilter>),
}

struct Slot {
    value: CachedBlock,
    charge: u64,
    priority: Priority,
    tick: u64,
}

struct Shard {
    capacity: u64,
    high_pri_capacity: u64,
    strict: bool,
    usage: u64,
    high_pri_usage: u64,
    tick: u64,
    slots: HashMap<CacheKey, Slot>,
    high_lru: BTreeMap<u64, CacheKey>,
    low_lru: BTreeMap<u64, CacheKey>,
}

impl Shard {
    fn new(capacity: u64, high_pri_ratio: f64, strict: bool) -> Self {
        Self {
            capacity,
            high_pri_capacity: (capacity as f64 * high_pri_ratio) as u64,
            strict,
            usage: 0,
            high_pri_usage: 0,
            tick: 0,
            slots: HashMap::new(),
            high_lru: BTreeMap::new(),
            low_lru: BTreeMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn lookup(&mut self, key: &CacheKey) -> Option<CachedBlock> {
        let tick = self.next_tick();
        let slot = self.slots.get_mut(key)?;
        match slot.priority {
            Priority::High => {
                self.high_lru.remove(&slot.tick);
                self.high_lru.insert(tick, *key);
            }
            Priority::Low => {
                self.low_lru.remove(&slot.tick);
                self.low_lru.insert(tick, *key);
            }
        }
        slot.tick = tick;
        Some(slot.value.clone())
    }

    fn insert(&mut self, key: CacheKey, value: CachedBlock, charge: u64, priority: Priority) -> bool {
        if self.strict && charge > self.capacity {
            return false;
        }

        self.remove(&key);

        let tick = self.next_tick();
        match priority {
            Priority::High => {
                self.high_lru.insert(tick, key);
                self.high_pri_usage += charge;
            }
            Priority::Low => {
                self.low_lru.insert(tick, key);
            }
        }
        self.usage += charge;
        self.slots.insert(
            key,
            Slot {
                value,
                charge,
                priority,
                tick,
            },
        );

        self.demote_overflow();
        self.evict();
        true
    }

    fn demote_overflow(&mut self) {
        while self.high_pri_usage > self.high_pri_capacity {
            let Some((tick, key)) = self.high_lru.pop_first() else {
                break;
            };
            if let Some(slot) = self.slots.get_mut(&key) {
                slot.priority = Priority::Low;
                self.high_pri_usage -= slot.charge;
                self.low_lru.insert(tick, key);
            }
        }
    }

    fn evict(&mut self) {
        while self.usage > self.capacity {
            let victim = match self.low_lru.first_key_value() {
                Some((_, key)) => *key,
                None => match self.high_lru.first_key_value() {
                    Some((_, key)) => *key,
                    None => break,
                },
            };
            self.remove(&victim);
        }
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some(slot) = self.slots.remove(key) {
            self.usage -= slot.charge;
            match slot.priority {
                Priority::High => {
                    self.high_lru.remove(&slot.tick);
                    self.high_pri_usage -= slot.charge;
                }
                Priority::Low => {
                    self.low_lru.remove(&slot.tick);
                }
            }
        }
    }
}

/// Sharded LRU cache for table blocks
pub struct BlockCache {
    options: CacheOptions,
    shards: Vec<Mutex<Shard>>,
    shard_mask: u64,
}

impl BlockCache {
    pub fn new(options: CacheOptions) -> Self {
        let shard_bits = if options.num_shard_bits >= 0 {
            options.num_shard_bits.min(20)
        } else {
            Self::auto_shard_bits(options.capacity)
        };
        let num_shards = 1u64 << shard_bits;
        let per_shard = options.capacity.div_ceil(num_shards);

        let shards = (0..num_shards)
            .map(|_| {
                Mutex::new(Shard::new(
                    per_shard,
                    options.high_pri_pool_ratio,
                    options.strict_capacity_limit,
                ))
            })
            .collect();

        Self {
            options,
            shards,
            shard_mask: num_shards - 1,
        }
    }

    fn auto_shard_bits(capacity: u64) -> i32 {
        let mut bits = 0;
        let mut shards_fit = capacity / MIN_SHARD_BYTES;
        while bits < MAX_AUTO_SHARD_BITS && shards_fit >= 2 {
            shards_fit >>= 1;
            bits += 1;
        }
        bits
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<Shard> {
        &self.shards[(key.shard_hash() & self.shard_mask) as usize]
    }

    /// Look up a block, refreshing its recency on a hit
    pub fn lookup(&self, key: &CacheKey) -> Option<CachedBlock> {
        self.shard(key).lock().lookup(key)
    }

    /// Insert a block. Returns `false` when the strict capacity limit
    /// rejects it.
    pub fn insert(&self, key: CacheKey, value: CachedBlock, charge: u64, priority: Priority) -> bool {
        self.shard(&key).lock().insert(key, value, charge, priority)
    }

    /// Drop a block if present
    pub fn erase(&self, key: &CacheKey) {
        self.shard(key).lock().remove(key);
    }

    pub fn capacity(&self) -> u64 {
        self.options.capacity
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Bytes currently charged
    pub fn usage(&self) -> u64 {
        self.shards.iter().map(|s| s.lock().usage).sum()
    }

    /// Bytes currently charged to the high-priority pool
    pub fn high_pri_usage(&self) -> u64 {
        self.shards.iter().map(|s| s.lock().high_pri_usage).sum()
    }

    /// Number of cached blocks
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().slots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
