//! Shared-secret signing.
//!
//! Before any certificate is trusted, both ends prove knowledge of the
//! operator's PIN with an HMAC-SHA256 keyed by it. Verification never fails
//! loudly: anything malformed simply does not verify.
//!
//! The key is the SHA-256 digest of the PIN rather than the PIN itself.
//! HMAC zero-pads short keys, so raw PINs differing only in trailing NUL
//! bytes would otherwise share a key.

use ring::{digest, hmac};

use crate::error::Result;
use crate::packet::{Data, Interest, SignatureInfo, SignatureType};
use crate::security::options::Pin;

fn key(pin: &Pin) -> hmac::Key {
    let digest = digest::digest(&digest::SHA256, pin.as_bytes());
    hmac::Key::new(hmac::HMAC_SHA256, digest.as_ref())
}

/// HMAC-SHA256 of `message` keyed by `pin`
#[must_use]
pub fn sign(message: &[u8], pin: &Pin) -> Vec<u8> {
    hmac::sign(&key(pin), message).as_ref().to_vec()
}

/// Constant-time check of `tag` over `message`
#[must_use]
pub fn verify(message: &[u8], tag: &[u8], pin: &Pin) -> bool {
    hmac::verify(&key(pin), message, tag).is_ok()
}

/// Append HMAC signature info and value to a command interest
pub fn sign_interest(interest: Interest, pin: &Pin) -> Result<Interest> {
    interest.sign_with(&SignatureInfo::hmac(), |bytes| Ok(sign(bytes, pin)))
}

/// Sign a data packet with HMAC, replacing any previous signature
pub fn sign_data(data: &mut Data, pin: &Pin) -> Result<()> {
    data.sign_with(SignatureInfo::hmac(), |bytes| Ok(sign(bytes, pin)))
}

/// Returns true if the interest carries a valid HMAC under `pin`
#[must_use]
pub fn verify_interest(interest: &Interest, pin: &Pin) -> bool {
    let Ok(info) = interest.signature_info() else {
        return false;
    };
    if info.signature_type != SignatureType::HmacSha256 {
        return false;
    }
    match (interest.signed_portion(), interest.signature_value()) {
        (Ok(portion), Some(value)) => verify(&portion, value, pin),
        _ => false,
    }
}

/// Returns true if the data packet carries a valid HMAC under `pin`
#[must_use]
pub fn verify_data(data: &Data, pin: &Pin) -> bool {
    let Some(signature) = data.signature() else {
        return false;
    };
    if signature.info.signature_type != SignatureType::HmacSha256 {
        return false;
    }
    data.signed_portion()
        .is_ok_and(|portion| verify(&portion, &signature.value, pin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ControlParameters;
    use proptest::prelude::*;

    fn probe(pin: &Pin) -> Interest {
        let params = ControlParameters::new().set_name("/home/as".parse().unwrap());
        let interest = Interest::command("/localhop/probe-device".parse().unwrap(), &params).unwrap();
        sign_interest(interest, pin).unwrap()
    }

    #[test]
    fn test_interest_round_trip() {
        let pin = Pin::from("abc123");
        let interest = probe(&pin);
        assert!(verify_interest(&interest, &pin));
        assert!(!verify_interest(&interest, &Pin::from("abc124")));
    }

    #[test]
    fn test_unsigned_interest_does_not_verify() {
        let interest = Interest::new("/localhop/probe-device".parse().unwrap());
        assert!(!verify_interest(&interest, &Pin::from("abc123")));
    }

    #[test]
    fn test_tampered_data_does_not_verify() {
        let pin = Pin::from("abc123");
        let mut data = Data::new("/a/b".parse().unwrap()).with_content(b"hello".to_vec());
        sign_data(&mut data, &pin).unwrap();
        assert!(verify_data(&data, &pin));

        let signature = data.signature().cloned().unwrap();
        let mut forged = Data::new("/a/b".parse().unwrap()).with_content(b"hellp".to_vec());
        forged
            .sign_with(signature.info, |_| Ok(signature.value.clone()))
            .unwrap();
        assert!(!verify_data(&forged, &pin));
    }

    #[test]
    fn test_identity_signature_is_not_hmac() {
        let pin = Pin::from("abc123");
        let mut data = Data::new("/a".parse().unwrap());
        data.sign_with(SignatureInfo::ed25519("/k".parse().unwrap()), |bytes| Ok(sign(bytes, &pin)))
            .unwrap();
        assert!(!verify_data(&data, &pin));
    }

    #[test]
    fn test_trailing_nul_is_another_pin() {
        let mut data = Data::new("/a".parse().unwrap()).with_content(b"hello".to_vec());
        sign_data(&mut data, &Pin::from("abc")).unwrap();
        assert!(verify_data(&data, &Pin::from("abc")));
        assert!(!verify_data(&data, &Pin::from("abc\0")));
        assert!(!verify_data(&data, &Pin::from("abc\0\0")));
    }

    fn any_pin() -> impl Strategy<Value = String> {
        proptest::collection::vec(prop_oneof![Just('\0'), any::<char>()], 0..16)
            .prop_map(|chars| chars.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_sign_verify(payload in proptest::collection::vec(any::<u8>(), 0..256),
                            pin_a in any_pin(),
                            pin_b in any_pin()) {
            let a = Pin::new(pin_a.clone());
            let mut data = Data::new("/payload".parse().unwrap()).with_content(payload);
            sign_data(&mut data, &a).unwrap();
            prop_assert!(verify_data(&data, &a));
            if pin_a != pin_b {
                prop_assert!(!verify_data(&data, &Pin::new(pin_b)));
            }
        }
    }
}
