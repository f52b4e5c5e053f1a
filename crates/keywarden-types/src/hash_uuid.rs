//! hash-derived uuids.
//!
//! recovery configurations and recovery tokens are identified by a uuid
//! derived from their content: the first 16 bytes of SHA-512 over the input,
//! with the rfc 4122 version nibble forced to 5 and the variant bits to `10`.
//! the derivation makes duplicate create requests deduplicate naturally and
//! must keep this exact bit layout so stored ids round-trip.

use sha2::{Digest, Sha512};
use uuid::{Builder, Uuid, Variant, Version};

/// derive a stable uuid from arbitrary input bytes.
pub fn hash_uuid(input: &[u8]) -> Uuid {
    let digest = Sha512::digest(input);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Builder::from_bytes(bytes)
        .with_variant(Variant::RFC4122)
        .with_version(Version::Sha1)
        .into_uuid()
}
