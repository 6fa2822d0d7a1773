// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Selecting identities from a keychain and moving them somewhere else.
//!
//! A transfer opens a source keychain, filters its signing identities by
//! issuance class, environment, and subject attributes, and writes the
//! matches either to a PEM armored PKCS#12 container file or into a new
//! keychain store. The destination is always protected by a caller
//! supplied passphrase; containers written for transit between machines
//! use that same passphrase rather than a baked-in one.

use {
    crate::{
        certificate::IdentityCertificate,
        container,
        error::IdentityExportError,
        keychain::{write_atomic, Keychain, KeychainIdentity},
    },
    log::warn,
    std::path::PathBuf,
    x509_certificate::CapturedX509Certificate,
};

/// Filter on the issuance class of a certificate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CertificateTypeFilter {
    /// Accept every issuance class.
    All,

    /// iOS App Store certificates (development and distribution).
    IosAppStore,

    /// Mac App Store certificates, including installer certificates.
    MacAppStore,

    /// Developer ID application and installer certificates.
    DeveloperId,
}

impl CertificateTypeFilter {
    fn matches(&self, cert: &CapturedX509Certificate) -> bool {
        match self {
            Self::All => true,
            Self::IosAppStore => cert.is_app_store(),
            Self::MacAppStore => cert.is_mac_app_store(),
            Self::DeveloperId => cert.is_developer_id(),
        }
    }
}

/// Filter on the development / production environment of a certificate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnvironmentFilter {
    All,
    Development,
    Production,
}

impl EnvironmentFilter {
    fn matches(&self, cert: &CapturedX509Certificate) -> bool {
        match self {
            Self::All => true,
            Self::Development => cert.is_development(),
            Self::Production => cert.is_production(),
        }
    }
}

/// Where exported identities land.
#[derive(Clone, Debug)]
pub enum ExportDestination {
    /// A PEM armored PKCS#12 container file.
    Container { path: PathBuf },

    /// A new keychain store. `force` deletes an existing store at the path.
    Store { path: PathBuf, force: bool },
}

/// A fully described export operation.
#[derive(Clone, Debug)]
pub struct ExportRequest {
    /// Path of the source keychain store.
    pub source: PathBuf,

    pub destination: ExportDestination,

    /// Passphrase protecting the destination (container password or new
    /// store passphrase).
    pub passphrase: String,

    /// Require the subject OrganizationalUnit (the developer team id) to
    /// equal this value.
    pub team_id: Option<String>,

    /// Require the subject Organization (the developer user name) to equal
    /// this value.
    pub user_name: Option<String>,

    pub certificate_type: CertificateTypeFilter,

    pub environment: EnvironmentFilter,
}

impl ExportRequest {
    /// Validate the request before doing any work.
    ///
    /// At least one subject attribute filter must be present: exporting
    /// every identity in a keychain is almost never what the caller wants
    /// and a typo'd flag should not silently do it.
    pub fn validate(&self) -> Result<(), IdentityExportError> {
        if self.team_id.is_none() && self.user_name.is_none() {
            return Err(IdentityExportError::Usage(
                "at least one of a team id or a user name is required".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether an identity satisfies every filter in this request.
    ///
    /// An identity whose certificate or private key cannot be loaded is
    /// skipped with a warning rather than failing the whole transfer,
    /// since unrelated corrupt items should not block an export.
    pub fn accepts(&self, identity: &KeychainIdentity) -> bool {
        let cert = match identity.certificate() {
            Ok(cert) => cert,
            Err(e) => {
                warn!("skipping {}: {}", identity.label(), e);
                return false;
            }
        };

        if let Err(e) = identity.private_key_der() {
            warn!("skipping {}: {}", identity.label(), e);
            return false;
        }

        if !self.certificate_type.matches(&cert) {
            return false;
        }

        if !self.environment.matches(&cert) {
            return false;
        }

        if let Some(team_id) = &self.team_id {
            if cert.organizational_unit_name().as_deref() != Some(team_id.as_str()) {
                return false;
            }
        }

        if let Some(user_name) = &self.user_name {
            if cert.organization_name().as_deref() != Some(user_name.as_str()) {
                return false;
            }
        }

        true
    }
}

/// The outcome of a successful transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransferSummary {
    /// Number of identities written to the destination.
    pub transferred: usize,
}

/// Execute an export request.
pub fn run(request: &ExportRequest) -> Result<TransferSummary, IdentityExportError> {
    request.validate()?;

    let source = Keychain::open(&request.source)?;

    let mut matched = vec![];

    for identity in source.search_identities(None)? {
        if !request.accepts(&identity) {
            continue;
        }

        let (cert_der, key_der) = source.export_identity(&identity)?;
        let cert = CapturedX509Certificate::from_der(cert_der)?;

        println!("Exporting certificate: {}", cert.subject_summary());

        matched.push((cert, key_der, identity.label().to_string()));
    }

    let text = container::encode_container(&matched, &request.passphrase)?;

    match &request.destination {
        ExportDestination::Container { path } => {
            write_atomic(path, text.as_bytes())?;
        }
        ExportDestination::Store { path, force } => {
            if *force && path.exists() {
                // Best effort. A failed delete surfaces as a create error below.
                if let Err(e) = Keychain::delete(path) {
                    warn!("unable to delete existing store: {}", e);
                }
            }

            // Identities travel to the destination store in encrypted
            // container form, never as bare key material.
            let mut destination = Keychain::create(path, &request.passphrase)?;
            destination.import_container(text.as_bytes(), &request.passphrase)?;
        }
    }

    Ok(TransferSummary {
        transferred: matched.len(),
    })
}
