use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid resource: {0}")]
    Invalid(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Reconcile error: {0}")]
    Reconcile(String),

    /// Sentinel: the world is not converged yet, try again shortly.
    #[error("reconcile again")]
    ReconcileAgain,

    /// An installer set from another release is being removed.
    #[error("upgrade pending: waiting for the previous release to be removed")]
    UpgradePending,

    /// An installer set is being removed to be created again.
    #[error("reinstalling: waiting for the previous installer set to be removed")]
    Reinstalling,

    #[error("Dependency missing: {0}")]
    DependencyMissing(String),

    #[error("InstallerSet not available: {0}")]
    InstallerSetNotAvailable(String),

    #[error("installer set release version is different")]
    VersionDifferent,

    #[error("installer set target namespace is different")]
    NamespaceDifferent,

    #[error("installer set is in invalid state: {0}")]
    InvalidState(String),

    #[error("installer set needs an update")]
    UpdateRequired,

    #[error("Leader election: {0}")]
    LeaderElection(String),

    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

/// Short alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn reconcile(msg: impl Into<String>) -> Self {
        Self::Reconcile(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Translate an API server error into the matching typed variant so
    /// callers can branch on not-found / invalid / conflict without digging
    /// into status codes.
    pub fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(what.into()),
            kube::Error::Api(ae) if ae.code == 422 => {
                Self::Invalid(format!("{}: {}", what.into(), ae.message))
            }
            kube::Error::Api(ae) if ae.code == 409 => {
                Self::Conflict(format!("{}: {}", what.into(), ae.message))
            }
            _ => Self::Kube(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    pub fn is_invalid(&self) -> bool {
        match self {
            Self::Invalid(_) => true,
            Self::Kube(kube::Error::Api(ae)) => ae.code == 422,
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Kube(kube::Error::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }

    /// The sentinel and the installer set replacement markers.
    pub fn is_reconcile_again(&self) -> bool {
        matches!(
            self,
            Self::ReconcileAgain | Self::UpgradePending | Self::Reinstalling
        )
    }

    /// Errors the controllers translate into a short requeue instead of a
    /// logged failure.
    pub fn is_transient(&self) -> bool {
        self.is_reconcile_again() || self.is_conflict()
    }
}
