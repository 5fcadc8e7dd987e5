//! Supplements `ringvault_core::chunk`'s in-module unit tests with coverage
//! that exercises the codec against a real backing file across multiple
//! chunks, the way the circular writer actually uses it.

use ringvault_core::chunk::Chunk;
use ringvault_core::constants::CHUNK_HEADER_SIZE;
use std::fs::OpenOptions;

#[test]
fn sequential_chunks_do_not_clobber_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunks.bin");
    let file = OpenOptions::new().read(true).write(true).create(true).open(&path).unwrap();
    file.set_len(CHUNK_HEADER_SIZE * 4).unwrap();

    let mut offset = 0u64;
    let mut written = Vec::new();
    for i in 0..3u32 {
        let key = format!("key-{i}");
        let value = format!("value-{i}").repeat(10);
        let chunk = Chunk::set(key.as_bytes(), value.as_bytes()).unwrap();
        chunk.write_at(&file, offset).unwrap();
        written.push((offset, key, value));
        offset += CHUNK_HEADER_SIZE + value.len() as u64;
    }

    for (offset, key, value) in written {
        let back = Chunk::read_at(&file, offset, CHUNK_HEADER_SIZE + value.len() as u64).unwrap();
        assert_eq!(back.key(), key.as_bytes());
        assert_eq!(back.data(), value.as_bytes());
    }
}

#[test]
fn empty_value_is_a_valid_chunk() {
    let chunk = Chunk::set(b"k", b"").unwrap();
    let bytes = chunk.marshal();
    assert_eq!(bytes.len(), CHUNK_HEADER_SIZE as usize);
    let back = Chunk::unmarshal(&bytes).unwrap();
    assert_eq!(back.data(), b"");
}
