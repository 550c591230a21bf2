//! In-memory identities, keys and certificates.
//!
//! Every identity owns Ed25519 keys; each key owns certificates. The default
//! key of an identity is created on first use, together with a self-signed
//! certificate whose key locator is the key name.

use std::collections::BTreeMap;
use std::fmt;

use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{self, Ed25519KeyPair, KeyPair};

use crate::cert::{self, Certificate, ValidityPeriod};
use crate::error::{Error, Result};
use crate::name::{Component, Name};
use crate::packet::{Data, Interest, SignatureInfo, SignatureType};

/// An Ed25519 key pair bound to a key name
#[derive(Clone)]
pub struct Key {
    name: Name,
    // `Ed25519KeyPair` is not `Clone`, so keep the seed.
    seed: [u8; 32],
    public: Vec<u8>,
}

impl Key {
    /// Generate a fresh key for `identity`
    pub fn generate(identity: &Name) -> Result<Self> {
        let mut seed = [0u8; 32];
        SystemRandom::new()
            .fill(&mut seed)
            .map_err(|_| Error::Crypto("key seed generation failed".into()))?;
        let public = Self::pair(&seed)?.public_key().as_ref().to_vec();
        let id = digest::digest(&digest::SHA256, &public);
        let name = cert::key_name(identity, &hex::encode(&id.as_ref()[..8]));
        Ok(Self { name, seed, public })
    }

    fn pair(seed: &[u8; 32]) -> Result<Ed25519KeyPair> {
        Ed25519KeyPair::from_seed_unchecked(seed)
            .map_err(|e| Error::Crypto(format!("ed25519 key rejected: {e}")))
    }

    /// Key name: `/<identity>/KEY/<key-id>`
    #[must_use]
    pub const fn name(&self) -> &Name {
        &self.name
    }

    /// Identity owning the key
    #[must_use]
    pub fn identity(&self) -> Name {
        self.name.prefix(-2)
    }

    /// Raw public key bytes
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    /// Sign `message`
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(Self::pair(&self.seed)?.sign(message).as_ref().to_vec())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.name)
            .field("public", &hex::encode(&self.public))
            .finish_non_exhaustive()
    }
}

/// Check an Ed25519 signature
#[must_use]
pub fn verify_signature(public_key: &[u8], message: &[u8], sig: &[u8]) -> bool {
    signature::UnparsedPublicKey::new(&signature::ED25519, public_key)
        .verify(message, sig)
        .is_ok()
}

/// Check a data packet's Ed25519 signature against `public_key`
#[must_use]
pub fn verify_data(data: &Data, public_key: &[u8]) -> bool {
    let Some(sig) = data.signature() else {
        return false;
    };
    sig.info.signature_type == SignatureType::Ed25519
        && data
            .signed_portion()
            .is_ok_and(|portion| verify_signature(public_key, &portion, &sig.value))
}

/// Check a signed interest's Ed25519 signature against `public_key`
#[must_use]
pub fn verify_interest(interest: &Interest, public_key: &[u8]) -> bool {
    let Ok(info) = interest.signature_info() else {
        return false;
    };
    if info.signature_type != SignatureType::Ed25519 {
        return false;
    }
    match (interest.signed_portion(), interest.signature_value()) {
        (Ok(portion), Some(sig)) => verify_signature(public_key, &portion, sig),
        _ => false,
    }
}

#[derive(Debug, Clone)]
struct KeyEntry {
    key: Key,
    certificates: BTreeMap<Name, Certificate>,
    default_certificate: Option<Name>,
}

/// A named identity and its keys
#[derive(Debug, Clone)]
pub struct Identity {
    name: Name,
    keys: BTreeMap<Name, KeyEntry>,
    default_key: Option<Name>,
}

impl Identity {
    const fn new(name: Name) -> Self {
        Self {
            name,
            keys: BTreeMap::new(),
            default_key: None,
        }
    }

    /// Identity name
    #[must_use]
    pub const fn name(&self) -> &Name {
        &self.name
    }

    /// Name of the default key, if one exists yet
    #[must_use]
    pub const fn default_key_name(&self) -> Option<&Name> {
        self.default_key.as_ref()
    }

    /// Names of every key of this identity
    pub fn key_names(&self) -> impl Iterator<Item = &Name> {
        self.keys.keys()
    }
}

/// Store of identities
#[derive(Debug, Default)]
pub struct KeyChain {
    identities: BTreeMap<Name, Identity>,
}

impl KeyChain {
    /// Create an empty key chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `name` if it does not exist yet. Keys are created lazily.
    pub fn create_identity(&mut self, name: &Name) -> &Identity {
        self.identities
            .entry(name.clone())
            .or_insert_with(|| Identity::new(name.clone()))
    }

    /// Look up an identity
    pub fn identity(&self, name: &Name) -> Result<&Identity> {
        self.identities
            .get(name)
            .ok_or_else(|| Error::IdentityNotFound(name.clone()))
    }

    fn identity_mut(&mut self, name: &Name) -> Result<&mut Identity> {
        self.identities
            .get_mut(name)
            .ok_or_else(|| Error::IdentityNotFound(name.clone()))
    }

    /// Create a new key with a self-signed certificate and make it the default
    pub fn create_key(&mut self, identity: &Name) -> Result<Key> {
        let key = Key::generate(identity)?;

        let mut data = Data::new(
            key.name()
                .clone()
                .append(cert::SELF_ISSUER)
                .append(Component::from_version(crate::name::next_version())),
        )
        .with_content(key.public_key().to_vec());
        let info = SignatureInfo::ed25519(key.name().clone())
            .with_validity(ValidityPeriod::days_from_now(cert::SELF_SIGNED_VALIDITY_DAYS));
        data.sign_with(info, |bytes| key.sign(bytes))?;
        let certificate = Certificate::from_data(data)?;

        let entry = KeyEntry {
            key: key.clone(),
            default_certificate: Some(certificate.name().clone()),
            certificates: BTreeMap::from([(certificate.name().clone(), certificate)]),
        };
        let id = self.identity_mut(identity)?;
        id.keys.insert(key.name().clone(), entry);
        id.default_key = Some(key.name().clone());
        Ok(key)
    }

    /// Default key of `identity`, created on first use
    pub fn default_key(&mut self, identity: &Name) -> Result<Key> {
        let id = self.identity(identity)?;
        if let Some(entry) = id.default_key.as_ref().and_then(|k| id.keys.get(k)) {
            return Ok(entry.key.clone());
        }
        self.create_key(identity)
    }

    /// Default certificate of the default key of `identity`.
    ///
    /// A key without certificates is replaced by a fresh one.
    pub fn default_certificate(&mut self, identity: &Name) -> Result<Certificate> {
        let key = self.default_key(identity)?;
        if let Some(certificate) = self.default_certificate_of(key.name()) {
            return Ok(certificate.clone());
        }
        let key = self.create_key(identity)?;
        self.default_certificate_of(key.name())
            .cloned()
            .ok_or_else(|| Error::CertificateNotFound(key.name().clone()))
    }

    fn default_certificate_of(&self, key_name: &Name) -> Option<&Certificate> {
        let entry = self.entry(key_name).ok()?;
        entry
            .default_certificate
            .as_ref()
            .and_then(|c| entry.certificates.get(c))
    }

    fn entry(&self, key_name: &Name) -> Result<&KeyEntry> {
        self.identities
            .get(&key_name.prefix(-2))
            .and_then(|id| id.keys.get(key_name))
            .ok_or_else(|| Error::KeyNotFound(key_name.clone()))
    }

    fn entry_mut(&mut self, key_name: &Name) -> Result<&mut KeyEntry> {
        self.identities
            .get_mut(&key_name.prefix(-2))
            .and_then(|id| id.keys.get_mut(key_name))
            .ok_or_else(|| Error::KeyNotFound(key_name.clone()))
    }

    /// Look up a key by name
    pub fn key(&self, key_name: &Name) -> Result<&Key> {
        self.entry(key_name).map(|e| &e.key)
    }

    /// Look up a certificate by name
    pub fn certificate(&self, cert_name: &Name) -> Result<&Certificate> {
        let key_name = cert_name.prefix(-2);
        self.entry(&key_name)?
            .certificates
            .get(cert_name)
            .ok_or_else(|| Error::CertificateNotFound(cert_name.clone()))
    }

    /// Add a certificate for a key held in this chain
    pub fn add_certificate(&mut self, certificate: Certificate) -> Result<()> {
        let entry = self.entry_mut(&certificate.key_name())?;
        if certificate.public_key() != entry.key.public_key() {
            return Err(Error::InvalidCertificate(format!(
                "{} does not certify {}",
                certificate.name(),
                entry.key.name()
            )));
        }
        entry
            .certificates
            .insert(certificate.name().clone(), certificate);
        Ok(())
    }

    /// Add a certificate and make it the default of its key
    pub fn set_default_certificate(&mut self, certificate: Certificate) -> Result<()> {
        let name = certificate.name().clone();
        let key_name = certificate.key_name();
        self.add_certificate(certificate)?;
        self.entry_mut(&key_name)?.default_certificate = Some(name);
        Ok(())
    }

    /// Sign `data` with the default key of `identity`.
    ///
    /// The key locator is the default certificate's name.
    pub fn sign_data(&mut self, identity: &Name, data: &mut Data) -> Result<()> {
        let certificate = self.default_certificate(identity)?;
        self.sign_with_certificate(data, &certificate, None)
    }

    /// Sign a command interest with the default key of `identity`
    pub fn sign_interest(&mut self, identity: &Name, interest: Interest) -> Result<Interest> {
        let certificate = self.default_certificate(identity)?;
        let key = self.key(&certificate.key_name())?;
        interest.sign_with(&SignatureInfo::ed25519(certificate.name().clone()), |bytes| {
            key.sign(bytes)
        })
    }

    /// Sign `data` with the key behind `signer`, located by the certificate name
    pub fn sign_with_certificate(
        &self,
        data: &mut Data,
        signer: &Certificate,
        validity: Option<ValidityPeriod>,
    ) -> Result<()> {
        let key = self.key(&signer.key_name())?;
        let mut info = SignatureInfo::ed25519(signer.name().clone());
        info.validity = validity;
        data.sign_with(info, |bytes| key.sign(bytes))
    }
}
