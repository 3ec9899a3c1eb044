//! Property tests for sealing and tagging

use depchain_crypto::{open, seal, IntegrityTagger, ReplicaKeyPair, SealedEnvelope, TagScheme};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn sealed_payload_opens_for_recipient(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let recipient = ReplicaKeyPair::generate();
        let envelope = seal(&recipient.public_key(), &payload).unwrap();
        prop_assert_eq!(open(&recipient, &envelope).unwrap(), payload);
    }

    #[test]
    fn any_flipped_ciphertext_bit_is_rejected(
        payload in proptest::collection::vec(any::<u8>(), 1..128),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let recipient = ReplicaKeyPair::generate();
        let mut envelope = seal(&recipient.public_key(), &payload).unwrap();
        let i = position.index(envelope.ciphertext.len());
        envelope.ciphertext[i] ^= 1 << bit;
        prop_assert!(open(&recipient, &envelope).is_err());
    }

    #[test]
    fn any_flipped_body_bit_breaks_the_tag(
        body in proptest::collection::vec(any::<u8>(), 1..128),
        position in any::<prop::sample::Index>(),
    ) {
        let a = ReplicaKeyPair::generate();
        let b = ReplicaKeyPair::generate();
        let sender = IntegrityTagger::new(TagScheme::Keyed, &a, &b.public_key()).unwrap();
        let receiver = IntegrityTagger::new(TagScheme::Keyed, &b, &a.public_key()).unwrap();

        let tag = sender.tag(b"0123456789abcdef", "a", &body);
        let mut tampered = body.clone();
        let i = position.index(tampered.len());
        tampered[i] ^= 0x80;
        prop_assert!(receiver.verify(b"0123456789abcdef", "a", &tampered, &tag).is_err());
    }
}

#[test]
fn envelope_survives_bincode() {
    let recipient = ReplicaKeyPair::generate();
    let envelope = seal(&recipient.public_key(), b"STATE").unwrap();
    let bytes = bincode::serialize(&envelope).unwrap();
    let decoded: SealedEnvelope = bincode::deserialize(&bytes).unwrap();
    assert_eq!(open(&recipient, &decoded).unwrap(), b"STATE");
}
