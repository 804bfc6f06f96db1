use thiserror::Error;

/// Failure to obtain a strong handle from an observer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum HandleError {
    /// The managed object has already been destroyed (or the weak handle
    /// never observed one). Permanent for that object.
    #[error("weak handle expired: the managed object is gone")]
    Expired,
}
