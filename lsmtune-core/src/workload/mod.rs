//! Workload traces
//!
//! A trace is a whitespace-delimited stream of operations:
//!
//! ```text
//! I <key> <value>   insert (upsert)
//! U <key> <value>   update (upsert, same as I)
//! D <key>           delete
//! Q <key>           point query
//! S <start> <end>   range scan over [start, end)
//! ```
//!
//! Operations usually sit one per line, but only whitespace separates
//! tokens. An unknown opcode discards the rest of its line.

mod generator;
mod interpreter;

pub use generator::{
    KeyDistribution, QueryMix, TraceGenerator, DEFAULT_KEY_SIZE, DEFAULT_VALUE_SIZE,
};
pub use interpreter::{Interpreter, WorkloadSummary};

use crate::{LsmError, Result};
use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One trace operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert { key: String, value: String },
    Update { key: String, value: String },
    Delete { key: String },
    PointQuery { key: String },
    RangeScan { start: String, end: String },
    /// Unrecognized opcode; nothing is applied
    Unknown { opcode: String },
}

impl Operation {
    /// Opcode character as written in a trace
    pub fn opcode(&self) -> &str {
        match self {
            Operation::Insert { .. } => "I",
            Operation::Update { .. } => "U",
            Operation::Delete { .. } => "D",
            Operation::PointQuery { .. } => "Q",
            Operation::RangeScan { .. } => "S",
            Operation::Unknown { opcode } => opcode,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert { key, value } | Operation::Update { key, value } => {
                write!(f, "{} {} {}", self.opcode(), key, value)
            }
            Operation::Delete { key } | Operation::PointQuery { key } => {
                write!(f, "{} {}", self.opcode(), key)
            }
            Operation::RangeScan { start, end } => write!(f, "S {} {}", start, end),
            Operation::Unknown { opcode } => f.write_str(opcode),
        }
    }
}

/// An operation with the trace line its opcode appeared on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOp {
    pub line: u64,
    pub op: Operation,
}

/// Streaming trace parser
pub struct TraceReader<R> {
    reader: R,
    /// Unconsumed tokens of the current line
    tokens: VecDeque<String>,
    line: u64,
    buf: String,
}

impl TraceReader<BufReader<File>> {
    /// Open a trace file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            LsmError::InvalidArgument(format!("Failed to open workload file {}: {}", path.display(), e))
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            tokens: VecDeque::new(),
            line: 0,
            buf: String::new(),
        }
    }

    /// Physical line last read
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Next operation, or `None` at the end of the trace
    pub fn next_op(&mut self) -> Result<Option<TraceOp>> {
        let Some(opcode) = self.next_token()? else {
            return Ok(None);
        };
        let line = self.line;

        let op = match opcode.as_str() {
            "I" => Operation::Insert {
                key: self.operand(line, "key")?,
                value: self.operand(line, "value")?,
            },
            "U" => Operation::Update {
                key: self.operand(line, "key")?,
                value: self.operand(line, "value")?,
            },
            "D" => Operation::Delete {
                key: self.operand(line, "key")?,
            },
            "Q" => Operation::PointQuery {
                key: self.operand(line, "key")?,
            },
            "S" => Operation::RangeScan {
                start: self.operand(line, "start key")?,
                end: self.operand(line, "end key")?,
            },
            _ => {
                self.tokens.clear();
                Operation::Unknown { opcode }
            }
        };
        Ok(Some(TraceOp { line, op }))
    }

    fn operand(&mut self, line: u64, what: &str) -> Result<String> {
        self.next_token()?.ok_or_else(|| LsmError::Trace {
            line,
            message: format!("missing {} at end of trace", what),
        })
    }

    fn next_token(&mut self) -> Result<Option<String>> {
        while self.tokens.is_empty() {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            self.tokens
                .extend(self.buf.split_whitespace().map(str::to_string));
        }
        Ok(self.tokens.pop_front())
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<TraceOp>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_op().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(trace: &str) -> Vec<TraceOp> {
        TraceReader::new(Cursor::new(trace))
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_parse_all_opcodes() {
        let ops = parse("I a 1\nU a 2\nD a\nQ a\nS b d\n");
        let expected = vec![
            Operation::Insert {
                key: "a".into(),
                value: "1".into(),
            },
            Operation::Update {
                key: "a".into(),
                value: "2".into(),
            },
            Operation::Delete { key: "a".into() },
            Operation::PointQuery { key: "a".into() },
            Operation::RangeScan {
                start: "b".into(),
                end: "d".into(),
            },
        ];
        assert_eq!(ops.iter().map(|o| o.op.clone()).collect::<Vec<_>>(), expected);
        assert_eq!(ops.iter().map(|o| o.line).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(ops[0].op.to_string(), "I a 1");
    }

    #[test]
    fn test_whitespace_tokenization() {
        let ops = parse("  I a 1 Q a\n\n\tD\n a\n");
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[1].line, 1);
        assert_eq!(ops[2].op, Operation::Delete { key: "a".into() });
        assert_eq!(ops[2].line, 3);
    }

    #[test]
    fn test_unknown_opcode_skips_line() {
        let ops = parse("X junk junk\nQ a\n");
        assert_eq!(
            ops[0].op,
            Operation::Unknown {
                opcode: "X".into()
            }
        );
        assert_eq!(ops[1].op, Operation::PointQuery { key: "a".into() });
        assert_eq!(ops[1].line, 2);
    }

    #[test]
    fn test_truncated_operand_is_fatal() {
        let mut reader = TraceReader::new(Cursor::new("Q a\nI key"));
        assert!(reader.next_op().unwrap().is_some());
        let err = reader.next_op().unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert!(matches!(err, LsmError::Trace { .. }));
    }
}
