//! S4: RAR5 password verification exercised directly against the pure
//! `rar_crypto` functions, without needing a real archive fixture.

#![cfg(feature = "rar")]

use pbkdf2::pbkdf2_hmac;
use rc_archive::rar_crypto::{verify_password, PasswordCheck};
use sha2::{Digest, Sha256};

const SALT: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
];
const KDF_COUNT: u8 = 15;

fn check_value_for(password: &[u8]) -> [u8; 12] {
    let iterations = (1u32 << KDF_COUNT) + 32;
    let mut pbkdf2_out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password, &SALT, iterations, &mut pbkdf2_out);

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
fn correct_password_verifies() {
    let check_value = check_value_for(b"p");
    let result = verify_password(b"p", SALT, KDF_COUNT, Some(check_value));
    assert_eq!(result, PasswordCheck::Correct);
}

#[test]
fn wrong_password_is_rejected() {
    let check_value = check_value_for(b"p");
    let result = verify_password(b"q", SALT, KDF_COUNT, Some(check_value));
    assert_eq!(result, PasswordCheck::Incorrect);
}

#[test]
fn self_inconsistent_check_value_is_unknown() {
    // The 4-byte sum doesn't match a SHA-256 prefix of the 8-byte check,
    // so this can't be verified against any password.
    let bogus_check_value = [0u8; 12];
    let result = verify_password(b"p", SALT, KDF_COUNT, Some(bogus_check_value));
    assert_eq!(result, PasswordCheck::Unknown);
}

#[test]
fn no_check_value_is_unknown() {
    let result = verify_password(b"p", SALT, KDF_COUNT, None);
    assert_eq!(result, PasswordCheck::Unknown);
}
