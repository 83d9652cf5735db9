#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The controller task has exited; no further commands are accepted.
    #[error("session controller stopped")]
    Stopped,
}
