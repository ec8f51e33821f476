use sha1::{Digest, Sha1};

// Identifier arithmetic for the m-bit Chord ring. Every identifier in the
// system (node ids, key ids, finger starts) is a u64 masked to the low m
// bits, and every comparison of ring positions goes through in_interval.

// Bit mask selecting the low m bits of an identifier
pub fn mask(m: u32) -> u64 {
    if m >= 64 {
        u64::MAX
    } else {
        (1u64 << m) - 1
    }
}

// SHA-1 mod 2^m. The digest is 160 bits; taking the last 8 bytes big-endian
// is the digest mod 2^64, and the mask finishes the reduction to 2^m.
fn truncate_digest(digest: &[u8], m: u32) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[digest.len() - 8..]);
    u64::from_be_bytes(bytes) & mask(m)
}

// Hash an "ip:port" pair to a node identifier
pub fn hash_address(ip: &str, port: u16, m: u32) -> u64 {
    let mut hasher = Sha1::new();
    hasher.update(format!("{}:{}", ip, port).as_bytes());
    truncate_digest(&hasher.finalize(), m)
}

// Hash a key to its position on the ring
pub fn hash_key(key: &str, m: u32) -> u64 {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    truncate_digest(&hasher.finalize(), m)
}

// Start of finger i: (id + 2^i) mod 2^m
pub fn finger_start(id: u64, i: u32, m: u32) -> u64 {
    id.wrapping_add(1u64 << i) & mask(m)
}

// (id - 2^i) mod 2^m, the target used when updating other nodes' fingers
pub fn finger_inverse(id: u64, i: u32, m: u32) -> u64 {
    id.wrapping_sub(1u64 << i) & mask(m)
}

// Test whether x lies on the clockwise arc from a to b. The endpoints are
// decided first and only by their inclusivity flags; a == b denotes the full
// ring minus whatever the flags exclude.
pub fn in_interval(x: u64, a: u64, b: u64, left_closed: bool, right_closed: bool) -> bool {
    if x == a && x == b {
        return left_closed || right_closed;
    }
    if x == a {
        return left_closed;
    }
    if x == b {
        return right_closed;
    }
    if a < b {
        a < x && x < b
    } else {
        // Wrap-around; a == b falls in here and covers the whole ring
        x > a || x < b
    }
}
