mod cache;
mod items;
mod schema;
mod search;
mod types;

pub use schema::Vault;
pub use types::{
    CacheStats, DatabaseError, EvictionReport, FtsConsistencyReport, SearchResult, VaultItem,
};
