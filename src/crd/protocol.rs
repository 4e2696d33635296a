//! Bucket protocol descriptors
//!
//! A Bucket carries exactly one populated protocol block matching its
//! signature. The driver binding the Bucket reads the block to locate
//! the real storage.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Protocol a bucket is accessed with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ProtocolSignature {
    #[default]
    #[serde(rename = "s3")]
    S3,
    #[serde(rename = "azureBlob")]
    AzureBlob,
    #[serde(rename = "gcs")]
    Gcs,
}

impl std::fmt::Display for ProtocolSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolSignature::S3 => write!(f, "s3"),
            ProtocolSignature::AzureBlob => write!(f, "azureBlob"),
            ProtocolSignature::Gcs => write!(f, "gcs"),
        }
    }
}

/// Protocol descriptor stored on a Bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub protocol_signature: ProtocolSignature,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Protocol>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_blob: Option<AzureProtocol>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsProtocol>,
}

/// S3 compatible endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3Protocol {
    pub endpoint: String,
    pub bucket_name: String,
    pub region: String,
    /// e.g. s3v2, s3v4
    pub signature_version: String,
}

/// Azure blob container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureProtocol {
    pub container_name: String,
    pub storage_account: String,
}

/// Google cloud storage bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcsProtocol {
    pub bucket_name: String,
    pub project_id: String,
}

impl Protocol {
    /// Name of the backing bucket or container, whichever block is set
    pub fn bucket_name(&self) -> Option<&str> {
        match self.protocol_signature {
            ProtocolSignature::S3 => self.s3.as_ref().map(|p| p.bucket_name.as_str()),
            ProtocolSignature::AzureBlob => {
                self.azure_blob.as_ref().map(|p| p.container_name.as_str())
            }
            ProtocolSignature::Gcs => self.gcs.as_ref().map(|p| p.bucket_name.as_str()),
        }
    }
}
