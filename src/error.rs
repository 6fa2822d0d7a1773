// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {std::path::PathBuf, thiserror::Error, x509_certificate::X509CertificateError};

/// Unified error type for identity export operations.
#[derive(Debug, Error)]
pub enum IdentityExportError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("cannot open keychain {}: {reason}", path.display())]
    StoreOpen { path: PathBuf, reason: String },

    #[error("cannot create keychain {}: {reason}", path.display())]
    StoreCreate { path: PathBuf, reason: String },

    #[error("cannot delete keychain {}: {reason}", path.display())]
    StoreDelete { path: PathBuf, reason: String },

    #[error("cannot read certificate attributes: {0}")]
    AttributeRead(String),

    #[error("unsupported keychain item type: {0}")]
    UnsupportedItemType(String),

    #[error("cannot export identity: {0}")]
    Export(String),

    #[error("cannot import identity: {0}")]
    Import(String),

    #[error("incorrect password given when decrypting container data")]
    ContainerBadPassword,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("X.509 certificate handler error: {0}")]
    X509(#[from] X509CertificateError),

    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    #[error("manifest serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IdentityExportError {
    /// Stable numeric code for user-facing failure reports.
    pub fn code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::StoreOpen { .. } => 10,
            Self::StoreCreate { .. } => 11,
            Self::StoreDelete { .. } => 12,
            Self::AttributeRead(_) => 20,
            Self::UnsupportedItemType(_) => 21,
            Self::Export(_) => 30,
            Self::Import(_) => 31,
            Self::ContainerBadPassword => 32,
            Self::Io(_) => 40,
            Self::X509(_) => 41,
            Self::Pem(_) => 42,
            Self::Json(_) => 43,
        }
    }

    /// Domain string for user-facing failure reports.
    pub fn domain(&self) -> &'static str {
        match self {
            Self::Usage(_) => "usage",
            Self::StoreOpen { .. } | Self::StoreCreate { .. } | Self::StoreDelete { .. } => {
                "keychain"
            }
            Self::AttributeRead(_) | Self::UnsupportedItemType(_) => "keychain",
            Self::Export(_) | Self::Import(_) | Self::ContainerBadPassword => "container",
            Self::Io(_) => "io",
            Self::X509(_) | Self::Pem(_) | Self::Json(_) => "codec",
        }
    }
}
