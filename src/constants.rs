// indexer constants

pub const BLOCK_REPORTING_FREQ_NUM: u32 = 1000;
pub const BULK_BATCH_SIZE: u32 = 500;
pub const DIRECT_BATCH_SIZE: u32 = 10;

// storage keys

pub const TOTAL_STAKE_ID: &str = "total";
pub const PROCESSOR_CURSOR_KEY: &[u8] = b"processor-cursor";

// chain constants

pub const PALLET_PREFIX: &str = "ParachainStaking.";
pub const SS58_CHECKSUM_PREFIX: &[u8] = b"SS58PRE";
pub const SS58_MAX_PREFIX: u16 = 16_383;

// percentage scaling: numerator * 10_000 / supply gives basis points

pub const PERCENTAGE_SCALE: u32 = 10_000;
pub const PERCENTAGE_DECIMALS: u32 = 2;

// resilience defaults

pub const SOURCE_FAILURE_THRESHOLD: u32 = 3;
pub const SOURCE_RETRY_DELAY_MILLIS: u64 = 5_000;
pub const BULK_RETRY_INTERVAL_SECS: u64 = 5 * 60;
pub const HISTORICAL_BLOCK_THRESHOLD: u32 = 100;
pub const RECONCILE_RETRY_INTERVAL_SECS: u64 = 60;

// snapshot fetch backoff

pub const FETCH_BASE_DELAY_MILLIS: u64 = 2_000;
pub const FETCH_MAX_DELAY_MILLIS: u64 = 30_000;
pub const OPTIONAL_FETCH_ATTEMPTS: u32 = 3;
