//! The crypto oracle (C1): secp256k1 ECDSA keygen/sign/verify and address
//! derivation. Treated elsewhere as an opaque interface — nothing outside
//! this module reaches into curve arithmetic directly.

use crate::sha256::Hash;
use ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::util::Saveable;

#[derive(Clone, Debug)]
pub struct PrivateKey(SigningKey);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(EcdsaSignature);

/// 40-hex-character RIPEMD160(SHA256(pubkey)) address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl PrivateKey {
    /// Generate a new random keypair's private half.
    pub fn new_key() -> Self {
        PrivateKey(SigningKey::random(&mut OsRng))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        SigningKey::from_slice(bytes).ok().map(PrivateKey)
    }
}

impl PublicKey {
    /// Uncompressed SEC1 point bytes, the input to address derivation.
    fn uncompressed_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    /// RIPEMD160(SHA256(uncompressed pubkey)) as a 40-hex-char address.
    pub fn address(&self) -> Address {
        address_of(self)
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        VerifyingKey::from_sec1_bytes(bytes).ok().map(PublicKey)
    }
}

/// `address_of(pk) -> 40-hex-char address`, the crypto oracle's address
/// derivation entry point (RIPEMD160(SHA256(uncompressed-secp256k1-point))).
pub fn address_of(pk: &PublicKey) -> Address {
    let sha = Sha256::digest(pk.uncompressed_bytes());
    let ripemd = Ripemd160::digest(sha);
    Address(hex::encode(ripemd))
}

/// `generate_keypair() -> (sk, pk, address)`.
pub fn generate_keypair() -> (PrivateKey, PublicKey, Address) {
    let sk = PrivateKey::new_key();
    let pk = sk.public_key();
    let address = pk.address();
    (sk, pk, address)
}

/// `sign(sk, msg) -> signature`, low-S enforced.
pub fn sign(sk: &PrivateKey, msg: &Hash) -> Signature {
    Signature::sign_hash(msg, sk)
}

/// `verify(pk, sig, msg) -> bool`. Rejects high-S signatures outright.
pub fn verify(pk: &PublicKey, sig: &Signature, msg: &Hash) -> bool {
    sig.verify(msg, pk)
}

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The literal, unspendable genesis premine address.
    pub fn genesis() -> Self {
        Address("genesis".to_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Address(s.to_string()))
    }
}

impl Signature {
    /// Sign `msg` under `sk`, normalizing to low-S so the result can never
    /// be malleated into its high-S equivalent and still verify.
    pub fn sign_hash(msg: &Hash, sk: &PrivateKey) -> Signature {
        let sig: EcdsaSignature = sk
            .0
            .sign_prehash(msg.as_bytes())
            .expect("signing a 32-byte prehash cannot fail");
        Signature(sig.normalize_s().unwrap_or(sig))
    }

    /// Verify `self` over `msg` under `pk`. High-S signatures are rejected
    /// even if otherwise mathematically valid — malleability defense.
    pub fn verify(&self, msg: &Hash, pk: &PublicKey) -> bool {
        if self.is_high_s() {
            return false;
        }
        pk.0.verify_prehash(msg.as_bytes(), &self.0).is_ok()
    }

    fn is_high_s(&self) -> bool {
        match self.0.normalize_s() {
            // normalize_s returns Some(normalized) only when the signature
            // was high-S to begin with.
            Some(_) => true,
            None => false,
        }
    }

    fn to_der(&self) -> Vec<u8> {
        self.0.to_der().as_bytes().to_vec()
    }

    fn from_der(bytes: &[u8]) -> Option<Self> {
        EcdsaSignature::from_der(bytes).ok().map(Signature)
    }
}

// -- Serde: hex-encode the wire representations so JSON payloads stay plain strings --

impl Serialize for PrivateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        PrivateKey::from_bytes(&bytes).ok_or_else(|| serde::de::Error::custom("invalid private key"))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.uncompressed_bytes()))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        PublicKey::from_bytes(&bytes).ok_or_else(|| serde::de::Error::custom("invalid public key"))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_der()))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Signature::from_der(&bytes).ok_or_else(|| serde::de::Error::custom("invalid signature"))
    }
}

impl Saveable for PrivateKey {
    fn load<I: std::io::Read>(reader: I) -> std::io::Result<Self> {
        ciborium::de::from_reader(reader)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad private key file"))
    }
    fn save<O: std::io::Write>(&self, writer: O) -> std::io::Result<()> {
        ciborium::ser::into_writer(self, writer)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "cannot save private key"))
    }
}

impl Saveable for PublicKey {
    fn load<I: std::io::Read>(reader: I) -> std::io::Result<Self> {
        ciborium::de::from_reader(reader)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad public key file"))
    }
    fn save<O: std::io::Write>(&self, writer: O) -> std::io::Result<()> {
        ciborium::ser::into_writer(self, writer)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "cannot save public key"))
    }
}
