//! KMIP request templates

use crate::ttlv::Ttlv;

const VENDOR_ID: &str = "cosmian";

/// AES-256 symmetric key tagged with `tag`.
pub fn create_symmetric(tag: &str) -> Ttlv {
    Ttlv::structure(
        "Create",
        vec![
            Ttlv::enumeration("ObjectType", "SymmetricKey"),
            Ttlv::structure(
                "Attributes",
                vec![
                    Ttlv::enumeration("CryptographicAlgorithm", "AES"),
                    Ttlv::integer("CryptographicLength", 256),
                    // Encrypt | Decrypt | WrapKey | UnwrapKey
                    Ttlv::integer("CryptographicUsageMask", 0x0000_000C | 0x0000_0030),
                    Ttlv::enumeration("KeyFormatType", "TransparentSymmetricKey"),
                    Ttlv::enumeration("ObjectType", "SymmetricKey"),
                    tag_attributes(tag),
                ],
            ),
        ],
    )
}

/// ECDH key pair on Curve25519 tagged with `tag`.
pub fn create_keypair(tag: &str) -> Ttlv {
    Ttlv::structure(
        "CreateKeyPair",
        vec![Ttlv::structure(
            "CommonAttributes",
            vec![
                Ttlv::enumeration("CryptographicAlgorithm", "ECDH"),
                Ttlv::integer("CryptographicLength", 256),
                Ttlv::structure(
                    "CryptographicDomainParameters",
                    vec![Ttlv::enumeration("RecommendedCurve", "CURVE25519")],
                ),
                Ttlv::enumeration("KeyFormatType", "ECPrivateKey"),
                Ttlv::enumeration("ObjectType", "PrivateKey"),
                tag_attributes(tag),
            ],
        )],
    )
}

/// Export raw key bytes.
pub fn export(key_uid: &str) -> Ttlv {
    Ttlv::structure(
        "Export",
        vec![
            Ttlv::text("UniqueIdentifier", key_uid),
            Ttlv::enumeration("KeyFormatType", "Raw"),
        ],
    )
}

pub fn locate(tag: &str) -> Ttlv {
    Ttlv::structure(
        "Locate",
        vec![Ttlv::structure("Attributes", vec![tag_attributes(tag)])],
    )
}

pub fn encrypt(key_uid: &str, plaintext_hex: &str) -> Ttlv {
    Ttlv::structure(
        "Encrypt",
        vec![
            Ttlv::text("UniqueIdentifier", key_uid),
            Ttlv::bytes_hex("Data", plaintext_hex),
        ],
    )
}

pub fn decrypt(key_uid: &str, ciphertext_hex: &str, iv_hex: &str, tag_hex: &str) -> Ttlv {
    Ttlv::structure(
        "Decrypt",
        vec![
            Ttlv::text("UniqueIdentifier", key_uid),
            Ttlv::bytes_hex("Data", ciphertext_hex),
            Ttlv::bytes_hex("IvCounterNonce", iv_hex),
            Ttlv::bytes_hex("AuthenticatedEncryptionTag", tag_hex),
        ],
    )
}

pub fn rekey(key_uid: &str) -> Ttlv {
    Ttlv::structure("ReKey", vec![Ttlv::text("UniqueIdentifier", key_uid)])
}

pub fn revoke(key_uid: &str, reason: &str) -> Ttlv {
    Ttlv::structure(
        "Revoke",
        vec![
            Ttlv::text("UniqueIdentifier", key_uid),
            Ttlv::structure(
                "RevocationReason",
                vec![
                    Ttlv::enumeration("RevocationReasonCode", "CessationOfOperation"),
                    Ttlv::text("RevocationMessage", reason),
                ],
            ),
        ],
    )
}

pub fn destroy(key_uid: &str) -> Ttlv {
    Ttlv::structure("Destroy", vec![Ttlv::text("UniqueIdentifier", key_uid)])
}

/// Tags travel as a vendor attribute whose value is the hex of a JSON array.
fn tag_attributes(tag: &str) -> Ttlv {
    let tags_json = serde_json::json!([tag]).to_string();
    Ttlv::structure(
        "VendorAttributes",
        vec![Ttlv::structure(
            "VendorAttributes",
            vec![
                Ttlv::text("VendorIdentification", VENDOR_ID),
                Ttlv::text("AttributeName", "tag"),
                Ttlv::bytes_hex("AttributeValue", hex::encode_upper(tags_json)),
            ],
        )],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ttlv::Ttlv;

    #[test]
    fn test_create_carries_tag() {
        let req = create_symmetric("file-1234");
        assert_eq!(req.tag, "Create");
        let value = req
            .find("Attributes/VendorAttributes/VendorAttributes/AttributeValue")
            .and_then(Ttlv::as_text)
            .unwrap();
        let decoded = String::from_utf8(hex::decode(value).unwrap()).unwrap();
        assert_eq!(decoded, r#"["file-1234"]"#);
        assert_eq!(
            req.find("Attributes/CryptographicLength").and_then(Ttlv::as_i64),
            Some(256)
        );
    }

    #[test]
    fn test_decrypt_fields() {
        let req = decrypt("k", "aa", "bb", "cc");
        assert_eq!(req.require_text("Data").unwrap(), "aa");
        assert_eq!(req.require_text("IvCounterNonce").unwrap(), "bb");
        assert_eq!(req.require_text("AuthenticatedEncryptionTag").unwrap(), "cc");
    }

    #[test]
    fn test_keypair_curve() {
        let req = create_keypair("t");
        assert_eq!(
            req.find("CommonAttributes/CryptographicDomainParameters/RecommendedCurve")
                .and_then(Ttlv::as_text),
            Some("CURVE25519")
        );
    }
}
