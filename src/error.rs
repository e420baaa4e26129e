/// Errors surfaced by the cluster API façade.
///
/// Every façade call returns one of these kinds instead of throwing; callers
/// match on the kind to decide the recovery policy.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("conflict (optimistic concurrency)")]
    Conflict,

    #[error("forbidden")]
    Forbidden,

    #[error("transient error: {0}")]
    Transient(String),
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) => match resp.code {
                404 => ApiError::NotFound,
                409 if resp.reason == "AlreadyExists" => ApiError::AlreadyExists,
                409 => ApiError::Conflict,
                403 => ApiError::Forbidden,
                code if (500..600).contains(&code) => ApiError::Transient(resp.message.clone()),
                _ => ApiError::Transient(resp.message.clone()),
            },
            other => ApiError::Transient(other.to_string()),
        }
    }
}

/// Top-level reconciliation error. Any error originating from the façade
/// ends up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cluster API error: {0}")]
    Api(#[from] ApiError),
}
