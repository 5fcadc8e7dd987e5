/// Narrow contract for the directory's key-hashing collaborator. Production
/// code uses [`Md5Digest`]; tests may substitute a fixed digest to pin down
/// exact bucket/segment placement.
pub trait KeyDigest {
    fn digest(&self, key: &[u8]) -> [u8; 16];
}

#[derive(Clone, Copy, Default)]
pub struct Md5Digest;

impl KeyDigest for Md5Digest {
    fn digest(&self, key: &[u8]) -> [u8; 16] {
        md5::compute(key).0
    }
}
