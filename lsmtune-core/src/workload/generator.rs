//! Synthetic trace generation

use super::{Operation, TraceReader};
use crate::{LsmError, Result};
use rand::distributions::{Alphanumeric, Distribution as _, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

/// Default key length of generated traces
pub const DEFAULT_KEY_SIZE: usize = 8;
/// Default value length; key plus value make a 1 KiB entry
pub const DEFAULT_VALUE_SIZE: usize = 1016;

/// How query keys are drawn from the preloaded key set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum KeyDistribution {
    Uniform,
    /// Zipf with exponent alpha; earlier preloaded keys are hotter
    Zipf(f64),
}

/// Relative weights of the operations in a query trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMix {
    pub point_queries: u32,
    pub updates: u32,
    pub deletes: u32,
    pub range_scans: u32,
    /// Preloaded keys covered by one range scan
    pub scan_length: usize,
}

impl Default for QueryMix {
    fn default() -> Self {
        Self {
            point_queries: 100,
            updates: 0,
            deletes: 0,
            range_scans: 0,
            scan_length: 16,
        }
    }
}

impl QueryMix {
    fn total(&self) -> u32 {
        self.point_queries + self.updates + self.deletes + self.range_scans
    }
}

enum Sampler {
    Uniform(Uniform<usize>),
    Zipf(rand_distr::Zipf<f64>),
}

impl Sampler {
    fn new(distribution: KeyDistribution, num_keys: usize) -> Result<Self> {
        match distribution {
            KeyDistribution::Uniform => Ok(Sampler::Uniform(Uniform::new(0, num_keys))),
            KeyDistribution::Zipf(alpha) => rand_distr::Zipf::new(num_keys as u64, alpha)
                .map(Sampler::Zipf)
                .map_err(|e| LsmError::InvalidArgument(format!("Zipf alpha {}: {}", alpha, e))),
        }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        match self {
            Sampler::Uniform(u) => u.sample(rng),
            // Zipf ranks start at 1
            Sampler::Zipf(z) => z.sample(rng) as usize - 1,
        }
    }
}

/// Writes insert-only and query traces
pub struct TraceGenerator {
    key_size: usize,
    value_size: usize,
    rng: StdRng,
}

impl TraceGenerator {
    /// A fixed `seed` makes the output reproducible
    pub fn new(key_size: usize, value_size: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            key_size: key_size.max(1),
            value_size: value_size.max(1),
            rng,
        }
    }

    fn random_string(&mut self, len: usize) -> String {
        (&mut self.rng)
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    /// Write `count` inserts of random keys and values
    pub fn write_insertions<W: Write>(&mut self, out: &mut W, count: u64) -> Result<()> {
        for _ in 0..count {
            let key = self.random_string(self.key_size);
            let value = self.random_string(self.value_size);
            writeln!(out, "{}", Operation::Insert { key, value })?;
        }
        out.flush()?;
        Ok(())
    }

    /// Write `count` operations over `keys` following `mix`
    pub fn write_queries<W: Write>(
        &mut self,
        out: &mut W,
        keys: &[String],
        count: u64,
        distribution: KeyDistribution,
        mix: QueryMix,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if keys.is_empty() {
            return Err(LsmError::InvalidArgument(
                "query traces need at least one preloaded key".into(),
            ));
        }
        if mix.total() == 0 {
            return Err(LsmError::InvalidArgument("query mix has no operations".into()));
        }

        let sampler = Sampler::new(distribution, keys.len())?;
        let mut sorted: Vec<&str> = keys.iter().map(String::as_str).collect();
        sorted.sort_unstable();

        for _ in 0..count {
            let key = keys[sampler.sample(&mut self.rng)].clone();
            let mut pick = self.rng.gen_range(0..mix.total());
            let op = if pick < mix.point_queries {
                Operation::PointQuery { key }
            } else {
                pick -= mix.point_queries;
                if pick < mix.updates {
                    Operation::Update {
                        key,
                        value: self.random_string(self.value_size),
                    }
                } else if pick - mix.updates < mix.deletes {
                    Operation::Delete { key }
                } else {
                    let start = sorted.partition_point(|k| *k < key.as_str());
                    let end = (start + mix.scan_length.max(1)).min(sorted.len() - 1);
                    let end = if end > start {
                        sorted[end].to_string()
                    } else {
                        // Past the last key
                        format!("{}~", key)
                    };
                    Operation::RangeScan { start: key, end }
                }
            };
            writeln!(out, "{}", op)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Keys inserted or updated by a trace, in trace order
    pub fn load_keys<R: BufRead>(trace: TraceReader<R>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for op in trace {
            match op?.op {
                Operation::Insert { key, .. } | Operation::Update { key, .. } => keys.push(key),
                _ => {}
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Cursor;

    fn parse(bytes: Vec<u8>) -> Vec<Operation> {
        TraceReader::new(Cursor::new(bytes))
            .map(|op| op.unwrap().op)
            .collect()
    }

    #[test]
    fn test_insertions_shape() {
        let mut gen = TraceGenerator::new(8, 24, Some(7));
        let mut out = Vec::new();
        gen.write_insertions(&mut out, 50).unwrap();

        let ops = parse(out.clone());
        assert_eq!(ops.len(), 50);
        for op in &ops {
            match op {
                Operation::Insert { key, value } => {
                    assert_eq!(key.len(), 8);
                    assert_eq!(value.len(), 24);
                    assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        let keys = TraceGenerator::load_keys(TraceReader::new(Cursor::new(out))).unwrap();
        assert_eq!(keys.len(), 50);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let run = |seed| {
            let mut out = Vec::new();
            TraceGenerator::new(8, 8, Some(seed))
                .write_insertions(&mut out, 10)
                .unwrap();
            out
        };
        assert_eq!(run(1), run(1));
        assert_ne!(run(1), run(2));
    }

    #[test]
    fn test_zipf_queries_favor_hot_keys() {
        let keys: Vec<String> = (0..1000).map(|i| format!("key{:04}", i)).collect();
        let mut gen = TraceGenerator::new(8, 8, Some(3));
        let mut out = Vec::new();
        gen.write_queries(&mut out, &keys, 2000, KeyDistribution::Zipf(1.0), QueryMix::default())
            .unwrap();

        let ops = parse(out);
        assert_eq!(ops.len(), 2000);
        let hot = ops
            .iter()
            .filter(|op| matches!(op, Operation::PointQuery { key } if key.as_str() < "key0010"))
            .count();
        assert!(hot > 400, "only {} queries hit the 10 hottest keys", hot);
    }

    #[test]
    fn test_mixed_operations() {
        let keys: Vec<String> = (0..100).map(|i| format!("k{:03}", i)).collect();
        let mix = QueryMix {
            point_queries: 25,
            updates: 25,
            deletes: 25,
            range_scans: 25,
            scan_length: 5,
        };
        let mut out = Vec::new();
        TraceGenerator::new(4, 4, Some(11))
            .write_queries(&mut out, &keys, 400, KeyDistribution::Uniform, mix)
            .unwrap();

        let ops = parse(out);
        let opcodes: HashSet<&str> = ops.iter().map(Operation::opcode).collect();
        assert_eq!(opcodes, ["Q", "U", "D", "S"].into_iter().collect());
        for op in &ops {
            if let Operation::RangeScan { start, end } = op {
                assert!(start < end);
            }
        }
    }

    #[test]
    fn test_query_errors() {
        let mut gen = TraceGenerator::new(4, 4, Some(1));
        let mut out = Vec::new();
        assert!(gen
            .write_queries(&mut out, &[], 1, KeyDistribution::Uniform, QueryMix::default())
            .is_err());
        let keys = vec!["a".to_string()];
        assert!(gen
            .write_queries(&mut out, &keys, 1, KeyDistribution::Zipf(-1.0), QueryMix::default())
            .is_err());
    }
}
