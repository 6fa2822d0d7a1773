// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Classification of Apple issued code signing certificates.
//!
//! Apple tags the certificates it issues with well-known X.509 extensions
//! denoting the issuance class (iOS App Store development, Developer ID,
//! and so on). The extension's presence alone conveys class membership:
//! the payload is an empty ASN.1 NULL and carries no information.
//!
//! This module defines those OIDs and exposes classification and subject
//! inspection helpers on [CapturedX509Certificate].

use {
    crate::error::IdentityExportError,
    bcder::{ConstOid, Oid},
    std::fmt::{Display, Formatter},
    x509_certificate::{
        rfc4519::{OID_ORGANIZATIONAL_UNIT_NAME, OID_ORGANIZATION_NAME},
        CapturedX509Certificate,
    },
};

/// Extension for `iPhone Developer` (iOS App Store development).
///
/// 1.2.840.113635.100.6.1.2
const OID_EXTENSION_IOS_APP_STORE_DEVELOPMENT: ConstOid =
    Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 2]);

/// Extension for `iPhone Distribution` (App Store distribution).
///
/// 1.2.840.113635.100.6.1.4
const OID_EXTENSION_APP_STORE_DISTRIBUTION: ConstOid =
    Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 4]);

/// Extension for `3rd Party Mac Developer Application` (Mac App distribution).
///
/// 1.2.840.113635.100.6.1.7
const OID_EXTENSION_MAC_APP_DISTRIBUTION: ConstOid =
    Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 7]);

/// Extension for `3rd Party Mac Developer Installer` (Mac installer distribution).
///
/// 1.2.840.113635.100.6.1.8
const OID_EXTENSION_MAC_INSTALLER_DISTRIBUTION: ConstOid =
    Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 8]);

/// Extension for `Mac Developer` (Mac App Store development).
///
/// 1.2.840.113635.100.6.1.12
const OID_EXTENSION_MAC_APP_STORE_DEVELOPMENT: ConstOid =
    Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 12]);

/// Extension for `Developer ID Application`.
///
/// 1.2.840.113635.100.6.1.13
const OID_EXTENSION_DEVELOPER_ID: ConstOid = Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 13]);

/// Extension for `Developer ID Installer`.
///
/// 1.2.840.113635.100.6.1.14
const OID_EXTENSION_DEVELOPER_ID_INSTALLER: ConstOid =
    Oid(&[42, 134, 72, 134, 247, 99, 100, 6, 1, 14]);

/// An Apple issuance class extension on a code signing certificate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IssuanceExtension {
    /// iOS App Store development.
    IosAppStoreDevelopment,

    /// App Store distribution.
    AppStoreDistribution,

    /// Mac App distribution.
    MacAppDistribution,

    /// Mac installer distribution.
    MacInstallerDistribution,

    /// Mac App Store development.
    MacAppStoreDevelopment,

    /// Developer ID (Application).
    DeveloperId,

    /// Developer ID Installer.
    DeveloperIdInstaller,
}

impl IssuanceExtension {
    /// Obtain all variants of this enumeration.
    pub fn all() -> Vec<Self> {
        vec![
            Self::IosAppStoreDevelopment,
            Self::AppStoreDistribution,
            Self::MacAppDistribution,
            Self::MacInstallerDistribution,
            Self::MacAppStoreDevelopment,
            Self::DeveloperId,
            Self::DeveloperIdInstaller,
        ]
    }

    pub fn as_oid(&self) -> ConstOid {
        match self {
            Self::IosAppStoreDevelopment => OID_EXTENSION_IOS_APP_STORE_DEVELOPMENT,
            Self::AppStoreDistribution => OID_EXTENSION_APP_STORE_DISTRIBUTION,
            Self::MacAppDistribution => OID_EXTENSION_MAC_APP_DISTRIBUTION,
            Self::MacInstallerDistribution => OID_EXTENSION_MAC_INSTALLER_DISTRIBUTION,
            Self::MacAppStoreDevelopment => OID_EXTENSION_MAC_APP_STORE_DEVELOPMENT,
            Self::DeveloperId => OID_EXTENSION_DEVELOPER_ID,
            Self::DeveloperIdInstaller => OID_EXTENSION_DEVELOPER_ID_INSTALLER,
        }
    }
}

impl Display for IssuanceExtension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IosAppStoreDevelopment => f.write_str("iOS App Store Development"),
            Self::AppStoreDistribution => f.write_str("App Store Distribution"),
            Self::MacAppDistribution => f.write_str("Mac App Distribution"),
            Self::MacInstallerDistribution => f.write_str("Mac Installer Distribution"),
            Self::MacAppStoreDevelopment => f.write_str("Mac App Store Development"),
            Self::DeveloperId => f.write_str("Developer ID"),
            Self::DeveloperIdInstaller => f.write_str("Developer ID Installer"),
        }
    }
}

impl TryFrom<&Oid> for IssuanceExtension {
    type Error = IdentityExportError;

    fn try_from(oid: &Oid) -> Result<Self, Self::Error> {
        // Surely there is a way to use `match`. But the `Oid` type is a bit wonky.
        let o = oid.as_ref();

        if o == OID_EXTENSION_IOS_APP_STORE_DEVELOPMENT.as_ref() {
            Ok(Self::IosAppStoreDevelopment)
        } else if o == OID_EXTENSION_APP_STORE_DISTRIBUTION.as_ref() {
            Ok(Self::AppStoreDistribution)
        } else if o == OID_EXTENSION_MAC_APP_DISTRIBUTION.as_ref() {
            Ok(Self::MacAppDistribution)
        } else if o == OID_EXTENSION_MAC_INSTALLER_DISTRIBUTION.as_ref() {
            Ok(Self::MacInstallerDistribution)
        } else if o == OID_EXTENSION_MAC_APP_STORE_DEVELOPMENT.as_ref() {
            Ok(Self::MacAppStoreDevelopment)
        } else if o == OID_EXTENSION_DEVELOPER_ID.as_ref() {
            Ok(Self::DeveloperId)
        } else if o == OID_EXTENSION_DEVELOPER_ID_INSTALLER.as_ref() {
            Ok(Self::DeveloperIdInstaller)
        } else {
            Err(IdentityExportError::UnsupportedItemType(format!(
                "OID is not a recognized issuance extension: {}",
                oid
            )))
        }
    }
}

/// The ordered relative distinguished name components of a certificate subject.
///
/// Component values that are not representable as strings are recorded with
/// a `None` value and skipped by the string lookups, matching how the
/// platform certificate property API surfaces them.
#[derive(Clone, Debug)]
pub struct SubjectName {
    components: Vec<(Vec<u8>, Option<String>)>,
}

impl SubjectName {
    /// The subject's Organization value, if present as a string.
    pub fn organization_name(&self) -> Option<&str> {
        self.find_string(OID_ORGANIZATION_NAME.as_ref())
    }

    /// The subject's OrganizationalUnit value, if present as a string.
    ///
    /// Apple issued certificates store the developer *team id* here.
    pub fn organizational_unit_name(&self) -> Option<&str> {
        self.find_string(OID_ORGANIZATIONAL_UNIT_NAME.as_ref())
    }

    fn find_string(&self, oid: &[u8]) -> Option<&str> {
        self.components.iter().find_map(|(typ, value)| {
            if typ.as_slice() == oid {
                value.as_deref()
            } else {
                None
            }
        })
    }
}

/// Extends [CapturedX509Certificate] with issuance classification and
/// subject inspection.
pub trait IdentityCertificate: Sized {
    /// Find an extension by OID.
    ///
    /// Absence is `None`, never an error.
    fn find_extension(&self, oid: &Oid) -> Option<&x509_certificate::rfc5280::Extension>;

    /// Whether the given issuance class extension is present.
    ///
    /// Presence alone signals class membership; the extension value is
    /// never consulted.
    fn has_issuance_extension(&self, extension: IssuanceExtension) -> bool;

    /// Obtain all [IssuanceExtension] present on this certificate.
    fn issuance_extensions(&self) -> Vec<IssuanceExtension>;

    /// Whether this is a development certificate (iOS or Mac).
    fn is_development(&self) -> bool;

    /// Whether this is a production / distribution certificate.
    fn is_production(&self) -> bool;

    /// Whether this is an iOS App Store certificate (development or distribution).
    fn is_app_store(&self) -> bool;

    /// Whether this is a Mac App Store certificate.
    fn is_mac_app_store(&self) -> bool;

    /// Whether this is a Developer ID class certificate (application or installer).
    fn is_developer_id(&self) -> bool;

    /// A human readable one-line summary of the certificate subject.
    ///
    /// Prefers the Common Name and falls back to a rendering of the full
    /// subject. Always produces a value for a well-formed certificate.
    fn subject_summary(&self) -> String;

    /// The ordered subject name components, or None if the subject has none.
    fn subject_components(&self) -> Option<SubjectName>;

    /// Shortcut for the subject Organization string.
    fn organization_name(&self) -> Option<String>;

    /// Shortcut for the subject OrganizationalUnit string.
    fn organizational_unit_name(&self) -> Option<String>;
}

impl IdentityCertificate for CapturedX509Certificate {
    fn find_extension(&self, oid: &Oid) -> Option<&x509_certificate::rfc5280::Extension> {
        let cert: &x509_certificate::rfc5280::Certificate = self.as_ref();

        cert.iter_extensions()
            .find(|ext| ext.id.as_ref() == oid.as_ref())
    }

    fn has_issuance_extension(&self, extension: IssuanceExtension) -> bool {
        let oid = Oid(bytes::Bytes::copy_from_slice(extension.as_oid().as_ref()));

        self.find_extension(&oid).is_some()
    }

    fn issuance_extensions(&self) -> Vec<IssuanceExtension> {
        let cert: &x509_certificate::rfc5280::Certificate = self.as_ref();

        cert.iter_extensions()
            .filter_map(|ext| IssuanceExtension::try_from(&ext.id).ok())
            .collect::<Vec<_>>()
    }

    fn is_development(&self) -> bool {
        self.has_issuance_extension(IssuanceExtension::IosAppStoreDevelopment)
            || self.has_issuance_extension(IssuanceExtension::MacAppStoreDevelopment)
    }

    fn is_production(&self) -> bool {
        self.has_issuance_extension(IssuanceExtension::AppStoreDistribution)
            || self.has_issuance_extension(IssuanceExtension::MacAppDistribution)
            || self.has_issuance_extension(IssuanceExtension::MacInstallerDistribution)
            || self.has_issuance_extension(IssuanceExtension::DeveloperId)
            || self.has_issuance_extension(IssuanceExtension::DeveloperIdInstaller)
    }

    fn is_app_store(&self) -> bool {
        self.has_issuance_extension(IssuanceExtension::IosAppStoreDevelopment)
            || self.has_issuance_extension(IssuanceExtension::AppStoreDistribution)
    }

    fn is_mac_app_store(&self) -> bool {
        self.has_issuance_extension(IssuanceExtension::MacAppStoreDevelopment)
            || self.has_issuance_extension(IssuanceExtension::MacAppDistribution)
            || self.has_issuance_extension(IssuanceExtension::MacInstallerDistribution)
    }

    fn is_developer_id(&self) -> bool {
        self.has_issuance_extension(IssuanceExtension::DeveloperId)
            || self.has_issuance_extension(IssuanceExtension::DeveloperIdInstaller)
    }

    fn subject_summary(&self) -> String {
        if let Some(cn) = self
            .subject_name()
            .iter_common_name()
            .next()
            .and_then(|atv| atv.to_string().ok())
        {
            return cn;
        }

        self.subject_name()
            .user_friendly_str()
            .unwrap_or_else(|_| String::new())
    }

    fn subject_components(&self) -> Option<SubjectName> {
        let components = self
            .subject_name()
            .iter_attributes()
            .map(|atv| (atv.typ.as_ref().to_vec(), atv.to_string().ok()))
            .collect::<Vec<_>>();

        if components.is_empty() {
            None
        } else {
            Some(SubjectName { components })
        }
    }

    fn organization_name(&self) -> Option<String> {
        self.subject_components()?
            .organization_name()
            .map(|s| s.to_string())
    }

    fn organizational_unit_name(&self) -> Option<String> {
        self.subject_components()?
            .organizational_unit_name()
            .map(|s| s.to_string())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use {
        super::*,
        bytes::Bytes,
        x509_certificate::{InMemorySigningKeyPair, KeyAlgorithm, X509CertificateBuilder},
    };

    /// Build a self-signed certificate carrying the given issuance extensions.
    ///
    /// Returns the certificate, its signing key pair, and the PKCS#8 DER
    /// encoding of the private key.
    pub(crate) fn issued_certificate(
        extensions: &[IssuanceExtension],
        common_name: &str,
        organization: Option<&str>,
        organizational_unit: Option<&str>,
    ) -> (CapturedX509Certificate, InMemorySigningKeyPair, Vec<u8>) {
        let mut builder = X509CertificateBuilder::new(KeyAlgorithm::Ed25519);

        builder
            .subject()
            .append_common_name_utf8_string(common_name)
            .unwrap();

        if let Some(organization) = organization {
            builder
                .subject()
                .append_organization_utf8_string(organization)
                .unwrap();
        }

        if let Some(unit) = organizational_unit {
            builder
                .subject()
                .append_organizational_unit_utf8_string(unit)
                .unwrap();
        }

        for extension in extensions {
            // Payload is an ASN.1 NULL, as on real Apple certificates.
            builder.add_extension_der_data(
                Oid(Bytes::copy_from_slice(extension.as_oid().as_ref())),
                true,
                [0x05, 0x00],
            );
        }

        builder.validity_duration(chrono::Duration::hours(1));

        let (cert, key_pair, document) = builder.create_with_random_keypair().unwrap();

        (cert, key_pair, document.as_ref().to_vec())
    }
}
