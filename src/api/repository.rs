//! Repository, credential secret and invoker records

use super::meta::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::Record;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSpec {
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Spec {
    #[serde(default)]
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsSpec {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureSpec {
    pub container: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwiftSpec {
    pub container: String,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct B2Spec {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestSpec {
    pub url: String,
}

/// Declarative backend descriptor; exactly one provider block is expected
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    pub storage_secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Spec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swift: Option<SwiftSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b2: Option<B2Spec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest: Option<RestSpec>,
}

/// The selected provider with its location fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Local(LocalSpec),
    S3(S3Spec),
    Gcs(GcsSpec),
    Azure(AzureSpec),
    Swift(SwiftSpec),
    B2(B2Spec),
    Rest(RestSpec),
}

impl Backend {
    pub fn provider(&self) -> &'static str {
        match self {
            Backend::Local(_) => "local",
            Backend::S3(_) => "s3",
            Backend::Gcs(_) => "gcs",
            Backend::Azure(_) => "azure",
            Backend::Swift(_) => "swift",
            Backend::B2(_) => "b2",
            Backend::Rest(_) => "rest",
        }
    }
}

impl BackendSpec {
    /// First populated provider block, in declaration order
    pub fn backend(&self) -> Option<Backend> {
        if let Some(ref s) = self.local {
            return Some(Backend::Local(s.clone()));
        }
        if let Some(ref s) = self.s3 {
            return Some(Backend::S3(s.clone()));
        }
        if let Some(ref s) = self.gcs {
            return Some(Backend::Gcs(s.clone()));
        }
        if let Some(ref s) = self.azure {
            return Some(Backend::Azure(s.clone()));
        }
        if let Some(ref s) = self.swift {
            return Some(Backend::Swift(s.clone()));
        }
        if let Some(ref s) = self.b2 {
            return Some(Backend::B2(s.clone()));
        }
        self.rest.as_ref().map(|s| Backend::Rest(s.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepositorySpec {
    pub backend: BackendSpec,
}

/// Backend state after the last successful backup and cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<bool>,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub snapshot_count: i64,
    #[serde(default)]
    pub snapshots_removed_on_last_cleanup: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Repository {
    pub metadata: ObjectMeta,
    pub spec: RepositorySpec,
    #[serde(default)]
    pub status: RepositoryStats,
}

/// Credential material referenced by `spec.backend.storageSecretName`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct InvokerSpec {
    #[serde(default)]
    pub paused: bool,
}

/// Configuration object that creates sessions (e.g. a backup schedule)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Invoker {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: InvokerSpec,
}

impl Record for Repository {
    const KIND: &'static str = "Repository";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Record for Secret {
    const KIND: &'static str = "Secret";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Record for Invoker {
    const KIND: &'static str = "Invoker";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
