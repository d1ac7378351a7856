//! Wire serialization of transactions (BIP144 witness encoding)
//!
//! Serialize(tx) = version ‖ [0x00 0x01] ‖ inputs ‖ outputs ‖ [witnesses] ‖ lock_time
//!
//! The marker/flag pair and the witness section are present only when at
//! least one input carries witness data.

use crate::constants::*;
use crate::error::{MultisigError, Result};
use crate::types::*;
use bitcoin_hashes::{sha256d, Hash as BitcoinHash};

/// Append a compact size (varint) to `out`
pub fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        out.push(n as u8);
    } else if n <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

/// Append a length-prefixed byte string
pub fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

pub(crate) fn write_outpoint(out: &mut Vec<u8>, outpoint: &OutPoint) {
    out.extend_from_slice(&outpoint.hash);
    out.extend_from_slice(&outpoint.index.to_le_bytes());
}

pub(crate) fn write_output(out: &mut Vec<u8>, output: &TransactionOutput) {
    out.extend_from_slice(&output.value.to_le_bytes());
    write_bytes(out, &output.script_pubkey);
}

/// Serialize a transaction, including witness data when present
pub fn serialize_transaction(tx: &Transaction) -> ByteString {
    encode(tx, tx.has_witness())
}

/// Serialize a transaction without witness data (txid / legacy digest form)
pub fn serialize_without_witness(tx: &Transaction) -> ByteString {
    encode(tx, false)
}

fn encode(tx: &Transaction, with_witness: bool) -> ByteString {
    let mut out = Vec::new();
    out.extend_from_slice(&tx.version.to_le_bytes());
    if with_witness {
        out.push(0x00);
        out.push(0x01);
    }

    write_compact_size(&mut out, tx.inputs.len() as u64);
    for input in &tx.inputs {
        write_outpoint(&mut out, &input.prevout);
        write_bytes(&mut out, &input.script_sig);
        out.extend_from_slice(&input.sequence.to_le_bytes());
    }

    write_compact_size(&mut out, tx.outputs.len() as u64);
    for output in &tx.outputs {
        write_output(&mut out, output);
    }

    if with_witness {
        for input in &tx.inputs {
            write_compact_size(&mut out, input.witness.len() as u64);
            for item in &input.witness {
                write_bytes(&mut out, item);
            }
        }
    }

    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    out
}

/// Cursor over a byte slice that reports truncation as `MalformedEncoding`
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(MultisigError::MalformedEncoding(format!(
                "need {} bytes at offset {}, only {} remain",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub(crate) fn compact_size(&mut self) -> Result<u64> {
        let prefix = self.u8()?;
        let (value, minimum) = match prefix {
            0xfd => (u16::from_le_bytes(self.array()?) as u64, 0xfd),
            0xfe => (u32::from_le_bytes(self.array()?) as u64, 0x1_0000),
            0xff => (u64::from_le_bytes(self.array()?), 0x1_0000_0000),
            n => return Ok(n as u64),
        };
        if value < minimum {
            return Err(MultisigError::MalformedEncoding(format!(
                "non-canonical compact size {}",
                value
            )));
        }
        Ok(value)
    }

    /// Read a count whose items need at least `min_item_size` bytes each
    fn count(&mut self, min_item_size: usize) -> Result<usize> {
        let n = self.compact_size()?;
        if n.saturating_mul(min_item_size as u64) > self.remaining() as u64 {
            return Err(MultisigError::MalformedEncoding(format!(
                "count {} exceeds remaining {} bytes",
                n,
                self.remaining()
            )));
        }
        Ok(n as usize)
    }

    fn bytes(&mut self) -> Result<ByteString> {
        let len = self.compact_size()?;
        if len > self.remaining() as u64 {
            return Err(MultisigError::MalformedEncoding(format!(
                "length prefix {} exceeds remaining {} bytes",
                len,
                self.remaining()
            )));
        }
        Ok(self.take(len as usize)?.to_vec())
    }
}

/// Deserialize a transaction from its wire encoding
pub fn deserialize_transaction(bytes: &[u8]) -> Result<Transaction> {
    let mut reader = Reader::new(bytes);
    let version = reader.i32()?;

    // BIP144: a zero input count followed by flag 0x01 marks witness encoding
    let mut segwit = false;
    if reader.peek() == Some(0x00) {
        reader.u8()?;
        let flag = reader.u8()?;
        if flag != 0x01 {
            return Err(MultisigError::MalformedEncoding(format!(
                "unknown witness flag 0x{:02x}",
                flag
            )));
        }
        segwit = true;
    }

    // outpoint (36) + script length (1) + sequence (4)
    let input_count = reader.count(41)?;
    let mut inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        let hash = reader.array::<32>()?;
        let index = reader.u32()?;
        let script_sig = reader.bytes()?;
        let sequence = reader.u32()?;
        inputs.push(TransactionInput {
            prevout: OutPoint { hash, index },
            script_sig,
            sequence,
            witness: Vec::new(),
        });
    }

    // value (8) + script length (1)
    let output_count = reader.count(9)?;
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        let value = reader.i64()?;
        let script_pubkey = reader.bytes()?;
        outputs.push(TransactionOutput { value, script_pubkey });
    }

    if segwit {
        for input in inputs.iter_mut() {
            let items = reader.count(1)?;
            let mut witness = Vec::with_capacity(items);
            for _ in 0..items {
                witness.push(reader.bytes()?);
            }
            input.witness = witness;
        }
        if inputs.iter().all(|input| input.witness.is_empty()) {
            return Err(MultisigError::MalformedEncoding(
                "superfluous witness flag".to_string(),
            ));
        }
    }

    let lock_time = reader.u32()?;
    if reader.remaining() != 0 {
        return Err(MultisigError::MalformedEncoding(format!(
            "{} trailing bytes",
            reader.remaining()
        )));
    }

    Ok(Transaction {
        version,
        inputs,
        outputs,
        lock_time,
    })
}

/// Double SHA-256
pub fn hash256(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}

/// Transaction id (wire order): Hash256 of the witness-stripped encoding
pub fn txid(tx: &Transaction) -> Hash {
    hash256(&serialize_without_witness(tx))
}

/// Witness transaction id (wire order)
pub fn wtxid(tx: &Transaction) -> Hash {
    hash256(&serialize_transaction(tx))
}

/// Weight(tx) = 3 × |Serialize(tx ∖ witness)| + |Serialize(tx)|
pub fn transaction_weight(tx: &Transaction) -> usize {
    let base = serialize_without_witness(tx).len();
    let total = serialize_transaction(tx).len();
    base * (WITNESS_SCALE_FACTOR - 1) + total
}

/// Virtual size: ⌈weight / 4⌉
pub fn virtual_size(tx: &Transaction) -> usize {
    (transaction_weight(tx) + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
}

pub fn to_hex(tx: &Transaction) -> String {
    hex::encode(serialize_transaction(tx))
}

pub fn from_hex(s: &str) -> Result<Transaction> {
    let bytes = hex::decode(s.trim())
        .map_err(|e| MultisigError::MalformedEncoding(format!("hex: {}", e)))?;
    deserialize_transaction(&bytes)
}
