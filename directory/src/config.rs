use serde::Deserialize;

fn default_max_connections() -> u32 {
    5
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    Sqlite {
        /// e.g. `sqlite://usage.db` or `sqlite::memory:`
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Apply pending migrations when the store is opened.
        #[serde(default)]
        run_migrations: bool,
    },
    /// Non-durable store for local development, seeded from config.
    Memory {
        #[serde(default)]
        tenants: Vec<TenantSeed>,
    },
}

/// Inline tenant definition for the in-memory store.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct TenantSeed {
    pub slug: String,
    pub name: Option<String>,
    pub api_key: String,
    pub environment_id: Option<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub write_tokens: Vec<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}
