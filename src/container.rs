// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Password protected, PEM armored PKCS#12 identity containers.
//!
//! An exported container is a text file holding one `PKCS12` PEM block per
//! identity. Each block wraps a standalone PFX structure protected by the
//! container password, so individual blocks remain importable by standard
//! tooling that expects a `.p12` file.

use {
    crate::error::IdentityExportError,
    x509_certificate::CapturedX509Certificate,
};

const PEM_TAG: &str = "PKCS12";

fn bmp_string(s: &str) -> Vec<u8> {
    let utf16: Vec<u16> = s.encode_utf16().collect();

    let mut bytes = Vec::with_capacity(utf16.len() * 2 + 2);
    for c in utf16 {
        bytes.push((c / 256) as u8);
        bytes.push((c % 256) as u8);
    }
    bytes.push(0x00);
    bytes.push(0x00);

    bytes
}

/// Encode a single identity as a PEM armored PFX block.
///
/// `name` becomes the friendly name attached to the bags, which keychain
/// import UIs display.
pub fn encode_identity(
    cert: &CapturedX509Certificate,
    key_pkcs8_der: &[u8],
    password: &str,
    name: &str,
) -> Result<pem::Pem, IdentityExportError> {
    let pfx = p12::PFX::new(cert.constructed_data(), key_pkcs8_der, None, password, name)
        .ok_or_else(|| {
            IdentityExportError::Export(format!("unable to assemble PFX for {}", name))
        })?;

    let der = yasna::construct_der(|writer| {
        pfx.write(writer);
    });

    Ok(pem::Pem {
        tag: PEM_TAG.to_string(),
        contents: der,
    })
}

/// Encode a collection of identities into container text.
pub fn encode_container(
    identities: &[(CapturedX509Certificate, Vec<u8>, String)],
    password: &str,
) -> Result<String, IdentityExportError> {
    let blocks = identities
        .iter()
        .map(|(cert, key, name)| encode_identity(cert, key, password, name))
        .collect::<Result<Vec<_>, IdentityExportError>>()?;

    Ok(pem::encode_many(&blocks))
}

/// Parse a single PFX structure into its certificate and PKCS#8 key.
fn parse_pfx(
    data: &[u8],
    password: &str,
) -> Result<(CapturedX509Certificate, Vec<u8>), IdentityExportError> {
    let pfx = p12::PFX::parse(data).map_err(|e| {
        IdentityExportError::Import(format!("data does not appear to be PFX: {:?}", e))
    })?;

    if !pfx.verify_mac(password) {
        return Err(IdentityExportError::ContainerBadPassword);
    }

    let data = match pfx.auth_safe {
        p12::ContentInfo::Data(data) => data,
        _ => {
            return Err(IdentityExportError::Import(
                "unexpected PFX content info".to_string(),
            ));
        }
    };

    let content_infos = yasna::parse_der(&data, |reader| {
        reader.collect_sequence_of(p12::ContentInfo::parse)
    })
    .map_err(|e| {
        IdentityExportError::Import(format!("failed parsing inner ContentInfo: {:?}", e))
    })?;

    let bmp_password = bmp_string(password);

    let mut certificate = None;
    let mut key = None;

    for content in content_infos {
        let bags_data = match content {
            p12::ContentInfo::Data(inner) => inner,
            p12::ContentInfo::EncryptedData(encrypted) => {
                encrypted.data(&bmp_password).ok_or_else(|| {
                    IdentityExportError::Import(
                        "failed decrypting inner EncryptedData".to_string(),
                    )
                })?
            }
            p12::ContentInfo::OtherContext(_) => {
                return Err(IdentityExportError::Import(
                    "unexpected OtherContext content in inner PFX data".to_string(),
                ));
            }
        };

        let bags = yasna::parse_ber(&bags_data, |reader| {
            reader.collect_sequence_of(p12::SafeBag::parse)
        })
        .map_err(|e| {
            IdentityExportError::Import(format!(
                "failed parsing SafeBag within inner Data: {:?}",
                e
            ))
        })?;

        for bag in bags {
            match bag.bag {
                p12::SafeBagKind::CertBag(cert_bag) => match cert_bag {
                    p12::CertBag::X509(cert_data) => {
                        certificate = Some(
                            CapturedX509Certificate::from_der(cert_data)
                                .map_err(|e| IdentityExportError::Import(e.to_string()))?,
                        );
                    }
                    p12::CertBag::SDSI(_) => {
                        return Err(IdentityExportError::Import(
                            "unexpected SDSI certificate data".to_string(),
                        ));
                    }
                },
                p12::SafeBagKind::Pkcs8ShroudedKeyBag(key_bag) => {
                    let decrypted = key_bag.decrypt(&bmp_password).ok_or_else(|| {
                        IdentityExportError::ContainerBadPassword
                    })?;

                    key = Some(decrypted);
                }
                p12::SafeBagKind::OtherBagKind(_) => {
                    return Err(IdentityExportError::Import(
                        "unexpected bag type in inner PFX content".to_string(),
                    ));
                }
            }
        }
    }

    match (certificate, key) {
        (Some(certificate), Some(key)) => Ok((certificate, key)),
        (None, Some(_)) => Err(IdentityExportError::Import(
            "failed to find x509 certificate in PFX data".to_string(),
        )),
        (_, None) => Err(IdentityExportError::Import(
            "failed to find private key in PFX data".to_string(),
        )),
    }
}

/// Decode container text into its identities.
///
/// Non-`PKCS12` PEM blocks are ignored so containers tolerate leading
/// commentary or concatenated unrelated PEM material.
pub fn decode_container(
    data: &[u8],
    password: &str,
) -> Result<Vec<(CapturedX509Certificate, Vec<u8>)>, IdentityExportError> {
    let blocks = pem::parse_many(data)?;

    blocks
        .into_iter()
        .filter(|block| block.tag == PEM_TAG)
        .map(|block| parse_pfx(&block.contents, password))
        .collect::<Result<Vec<_>, IdentityExportError>>()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::certificate::{testutil::issued_certificate, IssuanceExtension},
    };

    #[test]
    fn container_round_trip() {
        let (cert_a, _, key_a) = issued_certificate(
            &[IssuanceExtension::DeveloperId],
            "Developer ID Application: Jane Doe (ABC123)",
            Some("Jane Doe"),
            Some("ABC123"),
        );
        let (cert_b, _, key_b) = issued_certificate(
            &[IssuanceExtension::IosAppStoreDevelopment],
            "iPhone Developer: Jane Doe (ABC123)",
            Some("Jane Doe"),
            Some("ABC123"),
        );

        let container = encode_container(
            &[
                (cert_a.clone(), key_a.clone(), "identity a".to_string()),
                (cert_b.clone(), key_b.clone(), "identity b".to_string()),
            ],
            "s3cret",
        )
        .unwrap();

        assert!(container.contains("-----BEGIN PKCS12-----"));

        let decoded = decode_container(container.as_bytes(), "s3cret").unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(
            decoded[0].0.constructed_data(),
            cert_a.constructed_data()
        );
        assert_eq!(decoded[0].1, key_a);
        assert_eq!(
            decoded[1].0.constructed_data(),
            cert_b.constructed_data()
        );
        assert_eq!(decoded[1].1, key_b);
    }

    #[test]
    fn wrong_password_is_reported() {
        let (cert, _, key) = issued_certificate(&[], "Jane Doe", None, None);

        let container = encode_container(
            &[(cert, key, "identity".to_string())],
            "correct",
        )
        .unwrap();

        assert!(matches!(
            decode_container(container.as_bytes(), "incorrect"),
            Err(IdentityExportError::ContainerBadPassword)
        ));
    }

    #[test]
    fn foreign_pem_blocks_are_ignored() {
        let (cert, _, key) = issued_certificate(&[], "Jane Doe", None, None);

        let mut container = cert.encode_pem();
        container.push_str(
            &encode_container(&[(cert, key, "identity".to_string())], "pw").unwrap(),
        );

        let decoded = decode_container(container.as_bytes(), "pw").unwrap();
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn empty_container_decodes_to_nothing() {
        assert!(decode_container(b"", "pw").unwrap().is_empty());
    }
}
