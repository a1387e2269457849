use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::constants::HASH_BUFFER_SIZE;

/// Calculate SHA-256 hash of a file
///
/// Returns None if:
/// - The file is larger than max_bytes
/// - The path is not a regular file
pub fn calculate_sha256(path: &Path, max_bytes: u64) -> io::Result<Option<String>> {
    let metadata = std::fs::metadata(path)?;

    if !metadata.is_file() || metadata.len() > max_bytes {
        return Ok(None);
    }

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Some(format!("{:x}", hasher.finalize())))
}

/// SHA-256 of an in-memory buffer, hex encoded
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
