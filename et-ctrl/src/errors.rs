use et_core::errors::*;

err_impl! {EtControllerError,
    #[error("cleanup of {0} still in progress, wait before redeploying")]
    CleanupInProgress(String),

    #[error("deploy of {0} still in progress, wait before cleanup")]
    DeployInProgress(String),

    #[error("more than one derived object matches label set: {0}")]
    MultipleMatchingObjects(String),

    #[error("trigger {0} is still queued in one or more clusters")]
    StillQueued(String),
}
