// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! File-backed keychain stores holding certificates and signing identities.
//!
//! A store is a directory with a `store.json` manifest describing its items
//! and an `items/` directory holding PEM encoded certificates and private
//! keys. Creating a store records a PBKDF2 verifier of its passphrase so a
//! holder can later prove knowledge of it; opening a store does not require
//! the passphrase, mirroring how login keychain access behaves once a
//! session is unlocked.

use {
    crate::{
        certificate::IdentityCertificate,
        error::IdentityExportError,
    },
    log::{debug, warn},
    ring::rand::{SecureRandom, SystemRandom},
    serde::{Deserialize, Serialize},
    std::{
        io::Write,
        num::NonZeroU32,
        path::{Path, PathBuf},
    },
    x509_certificate::{CapturedX509Certificate, InMemorySigningKeyPair, Sign},
};

const MANIFEST_FILE_NAME: &str = "store.json";
const ITEMS_DIR_NAME: &str = "items";
const MANIFEST_VERSION: u32 = 1;

const PBKDF2_ITERATIONS: u32 = 100_000;
const PBKDF2_SALT_LENGTH: usize = 16;
const PBKDF2_KEY_LENGTH: usize = 32;

/// The class of items a keychain search matches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchClass {
    /// Signing identities (certificate + private key pairs).
    Identities,

    /// Certificates, whether or not a private key accompanies them.
    Certificates,

    /// Private keys.
    Keys,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ManifestItem {
    /// Item discriminator. `identity`, `certificate`, or `key`.
    kind: String,

    /// Human readable label, as shown by item listings.
    label: String,

    /// Store-relative path of the PEM encoded certificate, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    certificate: Option<String>,

    /// Store-relative path of the PEM encoded private key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct Manifest {
    version: u32,
    passphrase_salt: String,
    passphrase_verifier: String,
    next_item_id: u32,
    items: Vec<ManifestItem>,
}

/// A certificate in a keychain, loaded lazily from its backing files.
///
/// Attribute accessors read and parse the certificate on demand so that a
/// corrupt item surfaces as an attribute read failure, not a search failure.
#[derive(Clone, Debug)]
pub struct KeychainCertificate {
    certificate_path: PathBuf,
    label: String,
}

impl KeychainCertificate {
    /// The item's label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Load and parse the backing certificate.
    pub fn certificate(&self) -> Result<CapturedX509Certificate, IdentityExportError> {
        load_certificate(&self.certificate_path)
    }
}

/// A signing identity in a keychain.
#[derive(Clone, Debug)]
pub struct KeychainIdentity {
    certificate_path: PathBuf,
    key_path: PathBuf,
    label: String,
}

impl KeychainIdentity {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Load and parse the identity's certificate.
    pub fn certificate(&self) -> Result<CapturedX509Certificate, IdentityExportError> {
        load_certificate(&self.certificate_path)
    }

    /// Load the identity's private key as PKCS#8 DER.
    pub fn private_key_der(&self) -> Result<Vec<u8>, IdentityExportError> {
        let data = std::fs::read(&self.key_path).map_err(|e| {
            IdentityExportError::AttributeRead(format!(
                "reading private key {}: {}",
                self.key_path.display(),
                e
            ))
        })?;

        let block = pem::parse(&data).map_err(|e| {
            IdentityExportError::AttributeRead(format!(
                "parsing private key {}: {}",
                self.key_path.display(),
                e
            ))
        })?;

        Ok(block.contents)
    }
}

/// A private key in a keychain.
#[derive(Clone, Debug)]
pub struct KeychainKey {
    key_path: PathBuf,
    label: String,
}

impl KeychainKey {
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// An item matched by a keychain search.
#[derive(Clone, Debug)]
pub enum KeychainSearchResult {
    Identity(KeychainIdentity),
    Certificate(KeychainCertificate),
    Key(KeychainKey),
}

impl KeychainSearchResult {
    pub fn label(&self) -> &str {
        match self {
            Self::Identity(identity) => identity.label(),
            Self::Certificate(cert) => cert.label(),
            Self::Key(key) => key.label(),
        }
    }
}

/// An open keychain store.
#[derive(Debug)]
pub struct Keychain {
    path: PathBuf,
    manifest: Manifest,
}

impl Keychain {
    /// Create a new keychain store at the given path, protected by a passphrase.
    ///
    /// Fails if the path already exists.
    pub fn create(path: impl AsRef<Path>, passphrase: &str) -> Result<Self, IdentityExportError> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            return Err(IdentityExportError::StoreCreate {
                path,
                reason: "path already exists".to_string(),
            });
        }

        std::fs::create_dir_all(path.join(ITEMS_DIR_NAME)).map_err(|e| {
            IdentityExportError::StoreCreate {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut salt = [0u8; PBKDF2_SALT_LENGTH];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| IdentityExportError::StoreCreate {
                path: path.clone(),
                reason: "unable to generate passphrase salt".to_string(),
            })?;

        let mut verifier = [0u8; PBKDF2_KEY_LENGTH];
        ring::pbkdf2::derive(
            ring::pbkdf2::PBKDF2_HMAC_SHA256,
            NonZeroU32::new(PBKDF2_ITERATIONS).unwrap(),
            &salt,
            passphrase.as_bytes(),
            &mut verifier,
        );

        let manifest = Manifest {
            version: MANIFEST_VERSION,
            passphrase_salt: hex::encode(salt),
            passphrase_verifier: hex::encode(verifier),
            next_item_id: 0,
            items: vec![],
        };

        let keychain = Self { path, manifest };
        keychain.write_manifest()?;

        debug!("created keychain store at {}", keychain.path.display());

        Ok(keychain)
    }

    /// Open an existing keychain store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IdentityExportError> {
        let path = path.as_ref().to_path_buf();

        let manifest_path = path.join(MANIFEST_FILE_NAME);

        let data =
            std::fs::read(&manifest_path).map_err(|e| IdentityExportError::StoreOpen {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let manifest: Manifest =
            serde_json::from_slice(&data).map_err(|e| IdentityExportError::StoreOpen {
                path: path.clone(),
                reason: format!("malformed manifest: {}", e),
            })?;

        if manifest.version != MANIFEST_VERSION {
            return Err(IdentityExportError::StoreOpen {
                path,
                reason: format!("unknown manifest version {}", manifest.version),
            });
        }

        Ok(Self { path, manifest })
    }

    /// Delete a keychain store and all items within.
    pub fn delete(path: impl AsRef<Path>) -> Result<(), IdentityExportError> {
        let path = path.as_ref();

        if !path.join(MANIFEST_FILE_NAME).is_file() {
            return Err(IdentityExportError::StoreDelete {
                path: path.to_path_buf(),
                reason: "not a keychain store".to_string(),
            });
        }

        std::fs::remove_dir_all(path).map_err(|e| IdentityExportError::StoreDelete {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// The filesystem path of this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verify a passphrase against the verifier recorded at creation time.
    pub fn verify_passphrase(&self, passphrase: &str) -> Result<bool, IdentityExportError> {
        let salt = hex::decode(&self.manifest.passphrase_salt).map_err(|e| {
            IdentityExportError::AttributeRead(format!("malformed passphrase salt: {}", e))
        })?;
        let verifier = hex::decode(&self.manifest.passphrase_verifier).map_err(|e| {
            IdentityExportError::AttributeRead(format!("malformed passphrase verifier: {}", e))
        })?;

        Ok(ring::pbkdf2::verify(
            ring::pbkdf2::PBKDF2_HMAC_SHA256,
            NonZeroU32::new(PBKDF2_ITERATIONS).unwrap(),
            &salt,
            passphrase.as_bytes(),
            &verifier,
        )
        .is_ok())
    }

    /// Search the store for items of a given class.
    ///
    /// `max_results` of `Some(n)` stops the search after `n` matches, which
    /// is cheaper than collecting everything when the caller only needs to
    /// probe for existence.
    pub fn search(
        &self,
        class: SearchClass,
        max_results: Option<usize>,
    ) -> Result<Vec<KeychainSearchResult>, IdentityExportError> {
        let mut results = vec![];

        for item in &self.manifest.items {
            if let Some(max) = max_results {
                if results.len() >= max {
                    return Ok(results);
                }
            }

            match item.kind.as_str() {
                "identity" => {
                    if matches!(class, SearchClass::Identities | SearchClass::Certificates) {
                        let certificate = self.item_path(item.certificate.as_deref(), item)?;

                        results.push(match class {
                            SearchClass::Identities => {
                                KeychainSearchResult::Identity(KeychainIdentity {
                                    certificate_path: certificate,
                                    key_path: self.item_path(item.key.as_deref(), item)?,
                                    label: item.label.clone(),
                                })
                            }
                            _ => KeychainSearchResult::Certificate(KeychainCertificate {
                                certificate_path: certificate,
                                label: item.label.clone(),
                            }),
                        });
                    } else {
                        results.push(KeychainSearchResult::Key(KeychainKey {
                            key_path: self.item_path(item.key.as_deref(), item)?,
                            label: item.label.clone(),
                        }));
                    }
                }
                "certificate" => {
                    if matches!(class, SearchClass::Certificates) {
                        results.push(KeychainSearchResult::Certificate(KeychainCertificate {
                            certificate_path: self.item_path(item.certificate.as_deref(), item)?,
                            label: item.label.clone(),
                        }));
                    }
                }
                "key" => {
                    if matches!(class, SearchClass::Keys) {
                        results.push(KeychainSearchResult::Key(KeychainKey {
                            key_path: self.item_path(item.key.as_deref(), item)?,
                            label: item.label.clone(),
                        }));
                    }
                }
                kind => {
                    return Err(IdentityExportError::UnsupportedItemType(format!(
                        "item {} has kind {}",
                        item.label, kind
                    )));
                }
            }
        }

        Ok(results)
    }

    /// Search for signing identities.
    pub fn search_identities(
        &self,
        max_results: Option<usize>,
    ) -> Result<Vec<KeychainIdentity>, IdentityExportError> {
        Ok(self
            .search(SearchClass::Identities, max_results)?
            .into_iter()
            .filter_map(|result| match result {
                KeychainSearchResult::Identity(identity) => Some(identity),
                _ => None,
            })
            .collect::<Vec<_>>())
    }

    /// Search for certificates, with or without private keys.
    pub fn search_certificates(
        &self,
        max_results: Option<usize>,
    ) -> Result<Vec<KeychainCertificate>, IdentityExportError> {
        Ok(self
            .search(SearchClass::Certificates, max_results)?
            .into_iter()
            .filter_map(|result| match result {
                KeychainSearchResult::Certificate(cert) => Some(cert),
                _ => None,
            })
            .collect::<Vec<_>>())
    }

    /// Insert a certificate without a private key.
    pub fn insert_certificate(
        &mut self,
        cert: &CapturedX509Certificate,
    ) -> Result<(), IdentityExportError> {
        let id = self.manifest.next_item_id;
        let cert_rel = format!("{}/{:04}.crt.pem", ITEMS_DIR_NAME, id);

        write_atomic(
            &self.path.join(&cert_rel),
            cert.encode_pem().as_bytes(),
        )?;

        self.manifest.items.push(ManifestItem {
            kind: "certificate".to_string(),
            label: cert.subject_summary(),
            certificate: Some(cert_rel),
            key: None,
        });
        self.manifest.next_item_id = id + 1;

        self.write_manifest()
    }

    /// Insert a signing identity: a certificate together with its private key.
    ///
    /// The key must be valid PKCS#8 DER and its public key must match the
    /// certificate's, otherwise the import is refused. Returns a handle to
    /// the newly stored identity.
    pub fn insert_identity(
        &mut self,
        cert: &CapturedX509Certificate,
        key_pkcs8_der: &[u8],
    ) -> Result<KeychainIdentity, IdentityExportError> {
        let key_pair = InMemorySigningKeyPair::from_pkcs8_der(key_pkcs8_der).map_err(|e| {
            IdentityExportError::Import(format!("private key is not valid PKCS#8: {}", e))
        })?;

        if key_pair.public_key_data().as_ref() != cert.public_key_data().as_ref() {
            return Err(IdentityExportError::Import(
                "private key does not match certificate public key".to_string(),
            ));
        }

        let id = self.manifest.next_item_id;
        let cert_rel = format!("{}/{:04}.crt.pem", ITEMS_DIR_NAME, id);
        let key_rel = format!("{}/{:04}.key.pem", ITEMS_DIR_NAME, id);

        write_atomic(&self.path.join(&cert_rel), cert.encode_pem().as_bytes())?;

        let key_pem = pem::encode(&pem::Pem {
            tag: "PRIVATE KEY".to_string(),
            contents: key_pkcs8_der.to_vec(),
        });
        write_atomic(&self.path.join(&key_rel), key_pem.as_bytes())?;

        let label = cert.subject_summary();
        debug!("inserting identity into keychain: {}", label);

        let identity = KeychainIdentity {
            certificate_path: self.path.join(&cert_rel),
            key_path: self.path.join(&key_rel),
            label: label.clone(),
        };

        self.manifest.items.push(ManifestItem {
            kind: "identity".to_string(),
            label,
            certificate: Some(cert_rel),
            key: Some(key_rel),
        });
        self.manifest.next_item_id = id + 1;

        self.write_manifest()?;

        Ok(identity)
    }

    /// Import every identity in container text into this store.
    ///
    /// The container is decrypted with `passphrase`. Returns handles to the
    /// newly stored identities, in container order.
    pub fn import_container(
        &mut self,
        data: &[u8],
        passphrase: &str,
    ) -> Result<Vec<KeychainIdentity>, IdentityExportError> {
        crate::container::decode_container(data, passphrase)?
            .into_iter()
            .map(|(cert, key_der)| self.insert_identity(&cert, &key_der))
            .collect::<Result<Vec<_>, IdentityExportError>>()
    }

    /// Export an identity as its DER encoded certificate and PKCS#8 key.
    pub fn export_identity(
        &self,
        identity: &KeychainIdentity,
    ) -> Result<(Vec<u8>, Vec<u8>), IdentityExportError> {
        let cert = identity
            .certificate()
            .map_err(|e| IdentityExportError::Export(e.to_string()))?;
        let key = identity
            .private_key_der()
            .map_err(|e| IdentityExportError::Export(e.to_string()))?;

        Ok((cert.constructed_data().to_vec(), key))
    }

    fn item_path(
        &self,
        rel: Option<&str>,
        item: &ManifestItem,
    ) -> Result<PathBuf, IdentityExportError> {
        let rel = rel.ok_or_else(|| {
            IdentityExportError::UnsupportedItemType(format!(
                "item {} is missing a backing file",
                item.label
            ))
        })?;

        Ok(self.path.join(rel))
    }

    fn write_manifest(&self) -> Result<(), IdentityExportError> {
        let data = serde_json::to_vec_pretty(&self.manifest)?;

        write_atomic(&self.path.join(MANIFEST_FILE_NAME), &data)
    }
}

fn load_certificate(path: &Path) -> Result<CapturedX509Certificate, IdentityExportError> {
    let data = std::fs::read(path).map_err(|e| {
        IdentityExportError::AttributeRead(format!(
            "reading certificate {}: {}",
            path.display(),
            e
        ))
    })?;

    CapturedX509Certificate::from_pem(&data).map_err(|e| {
        IdentityExportError::AttributeRead(format!(
            "parsing certificate {}: {}",
            path.display(),
            e
        ))
    })
}

/// Write a file via a temporary sibling so readers never observe a partial write.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), IdentityExportError> {
    let dir = path.parent().ok_or_else(|| {
        IdentityExportError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "destination path has no parent directory",
        ))
    })?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.persist(path).map_err(|e| {
        warn!("unable to persist {}: {}", path.display(), e);
        IdentityExportError::Io(e.error)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::certificate::{testutil::issued_certificate, IssuanceExtension},
        tempfile::TempDir,
    };

    fn empty_store(dir: &TempDir) -> Keychain {
        Keychain::create(dir.path().join("store"), "hunter2").unwrap()
    }

    #[test]
    fn create_open_delete_lifecycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        let keychain = Keychain::create(&path, "hunter2").unwrap();
        assert!(keychain.verify_passphrase("hunter2").unwrap());
        assert!(!keychain.verify_passphrase("wrong").unwrap());

        // Creating over an existing store fails.
        assert!(matches!(
            Keychain::create(&path, "hunter2"),
            Err(IdentityExportError::StoreCreate { .. })
        ));

        let reopened = Keychain::open(&path).unwrap();
        assert!(reopened.search_identities(None).unwrap().is_empty());

        Keychain::delete(&path).unwrap();
        assert!(matches!(
            Keychain::open(&path),
            Err(IdentityExportError::StoreOpen { .. })
        ));
    }

    #[test]
    fn delete_refuses_non_store() {
        let dir = TempDir::new().unwrap();

        assert!(matches!(
            Keychain::delete(dir.path()),
            Err(IdentityExportError::StoreDelete { .. })
        ));
        // The directory must survive the refused delete.
        assert!(dir.path().is_dir());
    }

    #[test]
    fn insert_and_search_identity() {
        let dir = TempDir::new().unwrap();
        let mut keychain = empty_store(&dir);

        let (cert, _, key_der) = issued_certificate(
            &[IssuanceExtension::DeveloperId],
            "Developer ID Application: Jane Doe (ABC123)",
            Some("Jane Doe"),
            Some("ABC123"),
        );

        keychain.insert_identity(&cert, &key_der).unwrap();

        let identities = keychain.search_identities(None).unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(
            identities[0].label(),
            "Developer ID Application: Jane Doe (ABC123)"
        );

        let loaded = identities[0].certificate().unwrap();
        assert_eq!(loaded.constructed_data(), cert.constructed_data());
        assert_eq!(identities[0].private_key_der().unwrap(), key_der);

        // Identities also surface through certificate searches.
        assert_eq!(keychain.search_certificates(None).unwrap().len(), 1);
    }

    #[test]
    fn insert_identity_rejects_mismatched_key() {
        let dir = TempDir::new().unwrap();
        let mut keychain = empty_store(&dir);

        let (cert, _, _) = issued_certificate(&[], "Jane Doe", None, None);
        let (_, _, other_key) = issued_certificate(&[], "Someone Else", None, None);

        assert!(matches!(
            keychain.insert_identity(&cert, &other_key),
            Err(IdentityExportError::Import(_))
        ));
        assert!(keychain.search_identities(None).unwrap().is_empty());
    }

    #[test]
    fn certificate_only_items_are_not_identities() {
        let dir = TempDir::new().unwrap();
        let mut keychain = empty_store(&dir);

        let (cert, _, _) = issued_certificate(&[], "Lone Certificate", None, None);
        keychain.insert_certificate(&cert).unwrap();

        assert!(keychain.search_identities(None).unwrap().is_empty());
        assert_eq!(keychain.search_certificates(None).unwrap().len(), 1);
    }

    #[test]
    fn max_results_bounds_search() {
        let dir = TempDir::new().unwrap();
        let mut keychain = empty_store(&dir);

        for i in 0..3 {
            let (cert, _, key_der) =
                issued_certificate(&[], &format!("Identity {}", i), None, None);
            keychain.insert_identity(&cert, &key_der).unwrap();
        }

        assert_eq!(keychain.search_identities(Some(2)).unwrap().len(), 2);
        assert_eq!(keychain.search_identities(None).unwrap().len(), 3);
        assert_eq!(keychain.search_identities(Some(10)).unwrap().len(), 3);
    }

    #[test]
    fn unknown_item_kind_is_an_error() {
        let dir = TempDir::new().unwrap();
        let keychain = empty_store(&dir);
        let manifest_path = keychain.path().join(MANIFEST_FILE_NAME);

        let mut manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
        manifest["items"] = serde_json::json!([
            {"kind": "smart-card", "label": "Mystery Item"}
        ]);
        std::fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        let keychain = Keychain::open(keychain.path()).unwrap();
        assert!(matches!(
            keychain.search(SearchClass::Identities, None),
            Err(IdentityExportError::UnsupportedItemType(_))
        ));
    }

    #[test]
    fn import_container_yields_identity_handles() {
        let dir = TempDir::new().unwrap();
        let mut keychain = empty_store(&dir);

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

        let container = crate::container::encode_container(
            &[
                (cert_a.clone(), key_a.clone(), "a".to_string()),
                (cert_b.clone(), key_b, "b".to_string()),
            ],
            "transit",
        )
        .unwrap();

        let imported = keychain
            .import_container(container.as_bytes(), "transit")
            .unwrap();

        assert_eq!(imported.len(), 2);
        assert_eq!(
            imported[0].label(),
            "Developer ID Application: Jane Doe (ABC123)"
        );
        assert_eq!(
            imported[0].certificate().unwrap().constructed_data(),
            cert_a.constructed_data()
        );
        assert_eq!(imported[0].private_key_der().unwrap(), key_a);

        // The imported identities are persisted and searchable.
        let reopened = Keychain::open(keychain.path()).unwrap();
        assert_eq!(reopened.search_identities(None).unwrap().len(), 2);
    }

    #[test]
    fn import_container_rejects_wrong_passphrase() {
        let dir = TempDir::new().unwrap();
        let mut keychain = empty_store(&dir);

        let (cert, _, key) = issued_certificate(&[], "Jane Doe", None, None);
        let container = crate::container::encode_container(
            &[(cert, key, "identity".to_string())],
            "transit",
        )
        .unwrap();

        assert!(matches!(
            keychain.import_container(container.as_bytes(), "not-transit"),
            Err(IdentityExportError::ContainerBadPassword)
        ));
        assert!(keychain.search_identities(None).unwrap().is_empty());
    }

    #[test]
    fn export_round_trips_identity() {
        let dir = TempDir::new().unwrap();
        let mut keychain = empty_store(&dir);

        let (cert, _, key_der) = issued_certificate(
            &[IssuanceExtension::AppStoreDistribution],
            "iPhone Distribution: Jane Doe (ABC123)",
            Some("Jane Doe"),
            Some("ABC123"),
        );
        keychain.insert_identity(&cert, &key_der).unwrap();

        let identities = keychain.search_identities(None).unwrap();
        let (cert_der, exported_key) = keychain.export_identity(&identities[0]).unwrap();

        assert_eq!(cert_der, cert.constructed_data().to_vec());
        assert_eq!(exported_key, key_der);
    }
}
