//! Script, sighash and transaction constants

/// Maximum number of public keys in a standard CHECKMULTISIG script
pub const MAX_MULTISIG_KEYS: usize = 20;

/// Maximum money supply: 21,000,000 BTC in satoshis
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// Maximum script element size
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Default transaction version for newly assembled transactions
pub const DEFAULT_TX_VERSION: i32 = 2;

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Default maximum fee rate accepted on extraction, in sat/vbyte
pub const DEFAULT_MAX_FEE_RATE: u64 = 5000;

/// Witness scale factor (BIP141)
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Compressed public key length
pub const COMPRESSED_PUBKEY_LEN: usize = 33;

// Opcodes used by the standard templates
pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;

// Sighash flags
pub const SIGHASH_ALL: u8 = 0x01;
pub const SIGHASH_NONE: u8 = 0x02;
pub const SIGHASH_SINGLE: u8 = 0x03;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

// WIF version bytes
pub const WIF_PREFIX_MAINNET: u8 = 0x80;
pub const WIF_PREFIX_TESTNET: u8 = 0xef;
