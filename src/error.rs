use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    #[from]
    Kubeconfig(kube::config::KubeconfigError),

    /// The informer was shut down before the handler could be attached
    InformerStopped { kind: String },

    /// Shutdown fired before every tracked cache finished its initial list
    CacheSyncCancelled { pending: Vec<String> },
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::InformerStopped { kind } => {
                write!(fmt, "{kind} informer has stopped, handler not added")
            }
            Self::CacheSyncCancelled { pending } => {
                write!(fmt, "cache sync cancelled, still waiting on: {}", pending.join(", "))
            }
            _ => write!(fmt, "{self:?}"),
        }
    }
}

impl std::error::Error for Error {}
