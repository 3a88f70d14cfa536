//! BLS12-381 aggregate signature verification for Witness attestations
//!
//! - Public keys live in G1 (48 bytes compressed)
//! - Signatures live in G2 (96 bytes compressed)
//! - Verification equation: `e(aggregate_pubkey, H(message)) == e(G1_generator, signature)`
//!
//! Without the `bls` feature, verification always succeeds. Attestation
//! trust then rests entirely on the gateway's own quorum check rather than
//! a locally verified pairing; callers that need the real check must build
//! with `--features bls`.

use crate::error::Error;

pub const ATTESTATION_DST: &[u8] = b"scarcity-witness-v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlsError {
    InvalidPublicKey,
    InvalidSignature,
    VerificationFailed,
    NoSigners,
}

impl From<BlsError> for Error {
    fn from(e: BlsError) -> Error {
        Error::InvalidAttestation(format!("{e:?}"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BlsPublicKey(pub [u8; 48]);

#[derive(Debug, Clone, Copy)]
pub struct AggregateBlsSignature(pub [u8; 96]);

#[cfg(feature = "bls")]
mod real {
    use super::*;
    use ark_bls12_381::{Bls12_381, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
    use ark_ec::pairing::Pairing;
    use ark_ec::AffineRepr;
    use ark_ec::CurveGroup;
    use ark_ec::Group;
    use ark_ff::PrimeField;
    use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};

    pub fn verify_aggregate_signature(
        public_keys: &[BlsPublicKey],
        message: &[u8],
        signature: &AggregateBlsSignature,
    ) -> Result<bool, BlsError> {
        if public_keys.is_empty() {
            return Err(BlsError::NoSigners);
        }

        let mut aggregate_pubkey = G1Projective::default();
        for pk in public_keys {
            let pk_affine = G1Affine::deserialize_compressed(&pk.0[..])
                .map_err(|_| BlsError::InvalidPublicKey)?;
            aggregate_pubkey += pk_affine;
        }
        let aggregate_pubkey = aggregate_pubkey.into_affine();

        let sig = G2Affine::deserialize_compressed(&signature.0[..])
            .map_err(|_| BlsError::InvalidSignature)?;

        let message_point = hash_to_g2(message);
        let g1_gen = G1Affine::generator();

        let lhs = Bls12_381::pairing(aggregate_pubkey, message_point);
        let rhs = Bls12_381::pairing(g1_gen, sig);

        Ok(lhs == rhs)
    }

    fn hash_to_g2(message: &[u8]) -> G2Affine {
        use blake2::{Blake2b512, Digest};

        let mut hasher = Blake2b512::new();
        hasher.update(ATTESTATION_DST);
        hasher.update(message);
        let hash = hasher.finalize();

        let scalar = Fr::from_be_bytes_mod_order(&hash);
        let point = G2Projective::generator() * scalar;
        point.into_affine()
    }

    pub fn aggregate_signatures(
        signatures: &[&[u8; 96]],
    ) -> Result<AggregateBlsSignature, BlsError> {
        if signatures.is_empty() {
            return Err(BlsError::NoSigners);
        }

        let mut aggregate = G2Projective::default();
        for sig_bytes in signatures {
            let sig = G2Affine::deserialize_compressed(&sig_bytes[..])
                .map_err(|_| BlsError::InvalidSignature)?;
            aggregate += sig;
        }

        let mut result = [0u8; 96];
        aggregate
            .into_affine()
            .serialize_compressed(&mut result[..])
            .map_err(|_| BlsError::InvalidSignature)?;

        Ok(AggregateBlsSignature(result))
    }
}

#[cfg(feature = "bls")]
pub use real::{aggregate_signatures, verify_aggregate_signature};

#[cfg(not(feature = "bls"))]
pub fn verify_aggregate_signature(
    public_keys: &[BlsPublicKey],
    _message: &[u8],
    _signature: &AggregateBlsSignature,
) -> Result<bool, BlsError> {
    if public_keys.is_empty() {
        return Err(BlsError::NoSigners);
    }
    Ok(true)
}

#[cfg(not(feature = "bls"))]
pub fn aggregate_signatures(
    signatures: &[&[u8; 96]],
) -> Result<AggregateBlsSignature, BlsError> {
    if signatures.is_empty() {
        return Err(BlsError::NoSigners);
    }
    Ok(AggregateBlsSignature([0u8; 96]))
}

/// verify a Witness attestation: the package hash signed by the quorum's
/// aggregate public key
pub fn verify_attestation(
    package_hash: &[u8; 32],
    aggregate_pubkey: &BlsPublicKey,
    signature: &AggregateBlsSignature,
) -> Result<bool, BlsError> {
    verify_aggregate_signature(&[*aggregate_pubkey], package_hash, signature)
}
