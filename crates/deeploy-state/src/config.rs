use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StateConfig {
    #[serde(default)]
    pub kv: Option<KvConfig>,
    #[serde(default)]
    pub blob: Option<BlobConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum KvConfig {
    #[default]
    Memory,
    #[cfg(feature = "valkey")]
    Valkey {
        url: String,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default = "default_pool_size")]
        pool_size: usize,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BlobConfig {
    #[default]
    Memory,
    #[cfg(feature = "objectstore")]
    Local {
        path: String,
        #[serde(default = "default_blob_prefix")]
        prefix: String,
    },
    #[cfg(feature = "objectstore")]
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default = "default_blob_prefix")]
        prefix: String,
    },
}

#[cfg(feature = "valkey")]
fn default_pool_size() -> usize {
    10
}

#[cfg(feature = "objectstore")]
fn default_blob_prefix() -> String {
    "deeploy/pipelines".to_owned()
}
