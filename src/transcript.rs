//! Fiat-Shamir transcript used by every proof in the crate.
//!
//! Each value is appended with a label and a length prefix so that two
//! different sequences of appends can never produce the same byte stream.
//! Challenges are squeezed by hashing the accumulated bytes with SHA-512 and
//! reducing the digest modulo the scalar field order.

use ark_ec::CurveGroup;
use ark_ff::{BigInteger, PrimeField};
use ark_serialize::CanonicalSerialize;
use sha2::{Digest, Sha512};

use crate::ciphertext::CipherText;
use crate::error::Result;

const DOMAIN_TAG: &[u8] = b"unlynx/transcript/v1";

#[derive(Clone, Debug)]
pub struct ProofTranscript {
    buffer: Vec<u8>,
    squeezed: u64,
}

impl ProofTranscript {
    pub fn new(domain: &'static str) -> Self {
        let mut buffer = Vec::with_capacity(256);
        buffer.extend_from_slice(DOMAIN_TAG);
        buffer.extend_from_slice(&(domain.len() as u16).to_be_bytes());
        buffer.extend_from_slice(domain.as_bytes());
        Self {
            buffer,
            squeezed: 0,
        }
    }

    fn append_label(&mut self, label: &'static [u8]) {
        self.buffer.push(label.len() as u8);
        self.buffer.extend_from_slice(label);
    }

    pub fn append_bytes(&mut self, label: &'static [u8], bytes: &[u8]) {
        self.append_label(label);
        self.buffer
            .extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.buffer.extend_from_slice(bytes);
    }

    pub fn append_u64(&mut self, label: &'static [u8], value: u64) {
        self.append_label(label);
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn append_point<C: CurveGroup>(&mut self, label: &'static [u8], point: &C) -> Result<()> {
        let mut bytes = Vec::new();
        point.serialize_compressed(&mut bytes)?;
        self.append_bytes(label, &bytes);
        Ok(())
    }

    pub fn append_points<'a, C: CurveGroup>(
        &mut self,
        label: &'static [u8],
        points: impl IntoIterator<Item = &'a C>,
    ) -> Result<()> {
        let points: Vec<&C> = points.into_iter().collect();
        self.append_u64(label, points.len() as u64);
        for point in points {
            self.append_point(label, point)?;
        }
        Ok(())
    }

    pub fn append_ciphertexts<'a, C: CurveGroup>(
        &mut self,
        label: &'static [u8],
        ciphertexts: impl IntoIterator<Item = &'a CipherText<C>>,
    ) -> Result<()> {
        let ciphertexts: Vec<&CipherText<C>> = ciphertexts.into_iter().collect();
        self.append_u64(label, ciphertexts.len() as u64);
        for ct in ciphertexts {
            self.append_point(b"k", &ct.k)?;
            self.append_point(b"c", &ct.c)?;
        }
        Ok(())
    }

    pub fn append_scalar<F: PrimeField>(&mut self, label: &'static [u8], scalar: &F) {
        self.append_bytes(label, &scalar.into_bigint().to_bytes_le());
    }

    /// Derives a challenge from everything appended so far. Subsequent
    /// challenges also depend on the ones already squeezed.
    pub fn challenge_scalar<F: PrimeField>(&mut self, label: &'static [u8]) -> F {
        self.append_label(label);
        self.append_u64(b"squeeze", self.squeezed);
        self.squeezed += 1;
        let digest = Sha512::digest(&self.buffer);
        self.buffer.extend_from_slice(&digest);
        F::from_le_bytes_mod_order(&digest)
    }

    pub fn challenge_scalars<F: PrimeField>(&mut self, label: &'static [u8], count: usize) -> Vec<F> {
        (0..count).map(|_| self.challenge_scalar(label)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bn254::{Fr, G1Projective};
    use ark_ec::PrimeGroup;

    #[test]
    fn identical_transcripts_give_identical_challenges() {
        let point = G1Projective::generator() * Fr::from(5u64);
        let mut a = ProofTranscript::new("test");
        let mut b = ProofTranscript::new("test");
        a.append_point(b"p", &point).unwrap();
        b.append_point(b"p", &point).unwrap();
        assert_eq!(a.challenge_scalar::<Fr>(b"c"), b.challenge_scalar::<Fr>(b"c"));
    }

    #[test]
    fn domain_and_content_separate_challenges() {
        let mut a = ProofTranscript::new("one");
        let mut b = ProofTranscript::new("two");
        assert_ne!(a.challenge_scalar::<Fr>(b"c"), b.challenge_scalar::<Fr>(b"c"));

        let mut c = ProofTranscript::new("one");
        c.append_u64(b"n", 1);
        let mut d = ProofTranscript::new("one");
        d.append_u64(b"n", 2);
        assert_ne!(c.challenge_scalar::<Fr>(b"c"), d.challenge_scalar::<Fr>(b"c"));
    }

    #[test]
    fn domain_and_label_boundaries_do_not_collide() {
        let mut a = ProofTranscript::new("ab");
        a.append_bytes(b"c", b"");
        let mut b = ProofTranscript::new("a");
        b.append_bytes(b"bc", b"");
        assert_ne!(a.challenge_scalar::<Fr>(b"x"), b.challenge_scalar::<Fr>(b"x"));

        let point = G1Projective::generator();
        let mut one = ProofTranscript::new("points");
        one.append_points(b"p", [&point, &point]).unwrap();
        let mut two = ProofTranscript::new("points");
        two.append_points(b"p", [&point]).unwrap();
        two.append_point(b"p", &point).unwrap();
        assert_ne!(one.challenge_scalar::<Fr>(b"x"), two.challenge_scalar::<Fr>(b"x"));
    }

    #[test]
    fn successive_challenges_differ() {
        let mut transcript = ProofTranscript::new("test");
        let challenges = transcript.challenge_scalars::<Fr>(b"c", 3);
        assert_ne!(challenges[0], challenges[1]);
        assert_ne!(challenges[1], challenges[2]);
    }
}
