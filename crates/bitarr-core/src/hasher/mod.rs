mod checksum;

pub use checksum::{
    checksum_file, checksum_reader, AlgorithmInfo, ChecksumAlgorithm, ChecksumOutput, ReadError,
    DEFAULT_BLOCK_SIZE,
};
