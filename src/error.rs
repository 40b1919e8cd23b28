use thiserror::Error;

/// Failures surfaced by the catalog engine.
///
/// Provider failures never abort a cycle. They travel as a failed
/// [`ProviderResult`](crate::models::ProviderResult) and are logged as
/// [`CatalogError::ProviderFetch`].
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("provider '{provider}' fetch failed: {detail}")]
    ProviderFetch { provider: String, detail: String },

    #[error("catalog store write failed: {0}")]
    StoreWrite(#[source] sqlx::Error),

    #[error("catalog store read failed: {0}")]
    StoreRead(#[source] sqlx::Error),

    #[error("unknown provider: '{0}'")]
    UnknownProvider(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("refresh task aborted: {0}")]
    RefreshAborted(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
