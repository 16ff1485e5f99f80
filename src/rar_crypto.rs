//! RAR5 password verification and CRC "untweaking" (C7).
//!
//! Ported byte-for-byte from `archivey.rar_reader._verify_rar5_password_internal`
//! and `convert_crc_to_encrypted` (`original_source/src/archivey/rar_reader.py`).
//! Both entry points are pure functions of their arguments and are memoized,
//! since the same `(password, salt, kdf_count)` triple recurs once per member
//! in a solid, encrypted archive.

use std::sync::{Mutex, OnceLock};

use hmac::{Hmac, Mac};
use lru::LruCache;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Result of checking a password against a RAR5 `FileEncryptionRecord`'s
/// check value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    /// The password matches the check value.
    Correct,
    /// The password does not match the check value.
    Incorrect,
    /// No check value was present to compare against (header has
    /// `RAR_ENCDATA_FLAG_HAS_PASSWORD_CHECK_DATA` unset).
    Unknown,
}

const CACHE_CAPACITY: usize = 128;

type VerifyKey = (Vec<u8>, [u8; 16], u8, [u8; 12]);
type HashKey = (Vec<u8>, [u8; 16], u8);

fn verify_cache() -> &'static Mutex<LruCache<VerifyKey, PasswordCheck>> {
    static CACHE: OnceLock<Mutex<LruCache<VerifyKey, PasswordCheck>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(LruCache::new(std::num::NonZeroUsize::new(CACHE_CAPACITY).unwrap())))
}

fn hash_key_cache() -> &'static Mutex<LruCache<HashKey, [u8; 32]>> {
    static CACHE: OnceLock<Mutex<LruCache<HashKey, [u8; 32]>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(LruCache::new(std::num::NonZeroUsize::new(CACHE_CAPACITY).unwrap())))
}

/// Verify `password` against a RAR5 `FileEncryptionRecord`'s `check_value`.
///
/// `kdf_count` is the record's raw KDF count byte (iterations are
/// `2^kdf_count + 32`, per the RAR5 format). Returns [`PasswordCheck::Unknown`]
/// if `check_value` is `None` (no check data present in the header).
pub fn verify_password(
    password: &[u8],
    salt: [u8; 16],
    kdf_count: u8,
    check_value: Option<[u8; 12]>,
) -> PasswordCheck {
    let Some(check_value) = check_value else {
        return PasswordCheck::Unknown;
    };

    let key: VerifyKey = (password.to_vec(), salt, kdf_count, check_value);
    if let Some(hit) = verify_cache().lock().expect("rar verify cache poisoned").get(&key) {
        return *hit;
    }

    let result = verify_password_uncached(password, salt, kdf_count, &check_value);
    verify_cache()
        .lock()
        .expect("rar verify cache poisoned")
        .put(key, result);
    result
}

fn verify_password_uncached(
    password: &[u8],
    salt: [u8; 16],
    kdf_count: u8,
    check_value: &[u8; 12],
) -> PasswordCheck {
    // The check_value's own 4-byte sum must match a SHA-256 prefix of its
    // 8-byte check, independent of any password; if it doesn't, the check
    // data itself can't be trusted to verify anything.
    let expected_sum = Sha256::digest(&check_value[..8]);
    if expected_sum[..4] != check_value[8..12] {
        return PasswordCheck::Unknown;
    }

    let iterations = (1u32 << kdf_count) + 32;
    let mut pbkdf2_out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, &salt, iterations, &mut pbkdf2_out);

    let mut folded = [0u8; 8];
    const LEN_MASK: usize = 7;
    for (i, byte) in pbkdf2_out.iter().enumerate() {
        folded[i & LEN_MASK] ^= byte;
    }

    if folded == check_value[..8] {
        PasswordCheck::Correct
    } else {
        PasswordCheck::Incorrect
    }
}

fn hash_key(password: &[u8], salt: [u8; 16], kdf_count: u8) -> [u8; 32] {
    let key: HashKey = (password.to_vec(), salt, kdf_count);
    if let Some(hit) = hash_key_cache().lock().expect("rar hash key cache poisoned").get(&key) {
        return *hit;
    }

    let iterations = (1u32 << kdf_count) + 16;
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, &salt, iterations, &mut out);

    hash_key_cache()
        .lock()
        .expect("rar hash key cache poisoned")
        .put(key, out);
    out
}

/// Convert a plaintext CRC-32 into the tweaked checksum RAR5 stores for
/// password-protected members with `RAR_ENCDATA_FLAG_TWEAKED_CHECKSUMS` set.
///
/// The tweak is an HMAC-SHA256 of the little-endian CRC bytes keyed by a
/// PBKDF2-derived hash key, folded down to 32 bits by XOR-ing the four
/// little-endian words of the digest together.
pub fn untweak_crc(crc: u32, password: &[u8], salt: [u8; 16], kdf_count: u8) -> u32 {
    let key = hash_key(password, salt, kdf_count);
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key length");
    mac.update(&crc.to_le_bytes());
    let digest = mac.finalize().into_bytes();

    let mut folded = 0u32;
    for chunk in digest.chunks_exact(4) {
        let word = u32::from_le_bytes(chunk.try_into().expect("chunk is 4 bytes"));
        folded ^= word;
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a self-consistent `check_value` for `password`/`salt`/`kdf_count`
    /// the same way a real RAR5 writer would, so tests can exercise
    /// `Correct`/`Incorrect` without a fixture archive.
    fn make_check_value(password: &[u8], salt: [u8; 16], kdf_count: u8) -> [u8; 12] {
        let iterations = (1u32 << kdf_count) + 32;
        let mut pbkdf2_out = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password, &salt, iterations, &mut pbkdf2_out);

        let mut folded = [0u8; 8];
        for (i, byte) in pbkdf2_out.iter().enumerate() {
            folded[i & 7] ^= byte;
        }
        let sum = Sha256::digest(folded);

        let mut check_value = [0u8; 12];
        check_value[..8].copy_from_slice(&folded);
        check_value[8..12].copy_from_slice(&sum[..4]);
        check_value
    }

    #[test]
    fn unknown_when_no_check_value() {
        let result = verify_password(b"secret", [0u8; 16], 15, None);
        assert_eq!(result, PasswordCheck::Unknown);
    }

    #[test]
    fn unknown_when_check_value_is_self_inconsistent() {
        let result = verify_password(b"p", [0u8; 16], 15, Some([0u8; 12]));
        assert_eq!(result, PasswordCheck::Unknown);
    }

    #[test]
    fn correct_password_matches_its_own_check_value() {
        let salt = [0x0fu8; 16];
        let check = make_check_value(b"p", salt, 15);
        assert_eq!(verify_password(b"p", salt, 15, Some(check)), PasswordCheck::Correct);
    }

    #[test]
    fn wrong_password_is_incorrect() {
        let salt = [0x0fu8; 16];
        let check = make_check_value(b"p", salt, 15);
        assert_eq!(verify_password(b"q", salt, 15, Some(check)), PasswordCheck::Incorrect);
    }

    #[test]
    fn verify_password_is_deterministic_and_cached() {
        let salt = [7u8; 16];
        let check = make_check_value(b"pw", salt, 10);
        let a = verify_password(b"pw", salt, 10, Some(check));
        let b = verify_password(b"pw", salt, 10, Some(check));
        assert_eq!(a, b);
        assert_eq!(a, PasswordCheck::Correct);
    }

    #[test]
    fn untweak_crc_is_deterministic() {
        let salt = [2u8; 16];
        let a = untweak_crc(0xdead_beef, b"pw", salt, 12);
        let b = untweak_crc(0xdead_beef, b"pw", salt, 12);
        assert_eq!(a, b);
    }

    #[test]
    fn untweak_crc_differs_per_password() {
        let salt = [3u8; 16];
        let a = untweak_crc(42, b"pw1", salt, 10);
        let b = untweak_crc(42, b"pw2", salt, 10);
        assert_ne!(a, b);
    }
}
