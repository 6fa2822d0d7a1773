// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Export Apple code signing identities from keychain stores.
//!
//! This crate inspects X.509 certificates for the extensions Apple attaches
//! to the certificates it issues, classifies signing identities by issuance
//! class and environment, and moves selected identities out of a keychain
//! store into a password protected PEM armored PKCS#12 container or into
//! another store.
//!
//! The primary consumer is the `export-apple-certs` CLI, but the library
//! surface is usable on its own:
//!
//! * [certificate] — issuance extension OIDs, classification, and subject
//!   inspection on [x509_certificate::CapturedX509Certificate].
//! * [keychain] — the file backed store holding certificates and signing
//!   identities.
//! * [container] — PKCS#12 container encoding and decoding.
//! * [transfer] — filters and the export engine tying it all together.

pub mod certificate;
pub mod container;
pub mod error;
pub mod keychain;
pub mod transfer;

pub use {
    certificate::{IdentityCertificate, IssuanceExtension, SubjectName},
    error::IdentityExportError,
    keychain::{Keychain, KeychainIdentity, KeychainSearchResult, SearchClass},
    transfer::{
        CertificateTypeFilter, EnvironmentFilter, ExportDestination, ExportRequest,
        TransferSummary,
    },
};
