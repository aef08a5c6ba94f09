use chronicle_crypto::{
    derive_identity, derive_identity_with_params, generate_secret_phrase, CryptoError, KdfParams,
};
use pretty_assertions::assert_eq;

const PHRASE_A: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const PHRASE_B: &str =
    "legal winner thank year wave sausage worth useful legal winner thank yellow";

fn quick(phrase: &str) -> Result<chronicle_crypto::Identity, CryptoError> {
    derive_identity_with_params(phrase, &KdfParams::testing())
}

#[test]
fn same_phrase_yields_same_identity() {
    let a = quick(PHRASE_A).unwrap();
    let b = quick(PHRASE_A).unwrap();
    assert_eq!(a.client_id(), b.client_id());
    assert_eq!(a.key(), b.key());
}

#[test]
fn default_parameters_are_deterministic_too() {
    let a = derive_identity(PHRASE_B).unwrap();
    let b = derive_identity(PHRASE_B).unwrap();
    assert_eq!(a.client_id(), b.client_id());
    assert_eq!(a.key(), b.key());
}

#[test]
fn different_phrases_yield_different_identities() {
    let a = quick(PHRASE_A).unwrap();
    let b = quick(PHRASE_B).unwrap();
    assert_ne!(a.client_id(), b.client_id());
    assert_ne!(a.key(), b.key());
}

#[test]
fn client_id_does_not_depend_on_kdf_cost() {
    // The client id comes from the seed hash alone; only the key uses Argon2id.
    let cheap = quick(PHRASE_A).unwrap();
    let standard = derive_identity(PHRASE_A).unwrap();
    assert_eq!(cheap.client_id(), standard.client_id());
    assert_ne!(cheap.key(), standard.key());
}

#[test]
fn formatting_differences_are_normalized() {
    let messy = format!("  {}  ", PHRASE_B.to_uppercase().replace(' ', "\t "));
    let a = quick(&messy).unwrap();
    let b = quick(PHRASE_B).unwrap();
    assert_eq!(a.client_id(), b.client_id());
}

#[test]
fn wrong_word_count_is_invalid_secret() {
    let err = quick("abandon abandon about").unwrap_err();
    assert!(matches!(err, CryptoError::InvalidSecret(_)));
}

#[test]
fn unknown_word_is_invalid_secret() {
    let phrase = PHRASE_A.replace("about", "aboutt");
    assert!(matches!(quick(&phrase), Err(CryptoError::InvalidSecret(_))));
}

#[test]
fn bad_checksum_is_invalid_secret() {
    let phrase = ["abandon"; 12].join(" ");
    assert!(matches!(quick(&phrase), Err(CryptoError::InvalidSecret(_))));
}

#[test]
fn empty_phrase_is_invalid_secret() {
    assert!(matches!(quick("   "), Err(CryptoError::InvalidSecret(_))));
}

#[test]
fn generated_phrase_derives_cleanly() {
    let phrase = generate_secret_phrase().unwrap();
    let id = quick(&phrase).unwrap();
    assert_eq!(id.client_id().as_str().len(), 32);
}
