use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::SIGNATURE_LENGTH;

/// SHA-256 truncated to the 16 bytes carried in the footer
pub fn truncated_digest(data: &[u8]) -> [u8; SIGNATURE_LENGTH] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; SIGNATURE_LENGTH];
    out.copy_from_slice(&digest[..SIGNATURE_LENGTH]);
    out
}

/// Checks the trailing signature of `buf` against everything before it.
pub fn verify(buf: &[u8]) -> bool {
    if buf.len() < SIGNATURE_LENGTH {
        return false;
    }
    let (body, signature) = buf.split_at(buf.len() - SIGNATURE_LENGTH);
    truncated_digest(body)[..].ct_eq(signature).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let mut buf = b"streamer report body".to_vec();
        let sig = truncated_digest(&buf);
        buf.extend_from_slice(&sig);
        assert!(verify(&buf));

        buf[3] ^= 0x01;
        assert!(!verify(&buf));
    }

    #[test]
    fn test_too_short() {
        assert!(!verify(&[0u8; 8]));
    }
}
