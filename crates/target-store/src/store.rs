use crate::persistence::{PersistenceError, TargetPersistence};
use concepts::target::check_target_uri;
use concepts::{NotificationTarget, TargetSource, ValidationError};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Holds the single notification target.
///
/// Readers always see the latest committed value. Updates are serialized:
/// the new value is persisted first and only then swapped in, so a failed
/// write leaves the previous target in effect.
#[derive(derive_more::Debug)]
pub struct ConfigurationStore {
    current: RwLock<NotificationTarget>,
    #[debug(skip)]
    persistence: Mutex<Box<dyn TargetPersistence>>,
}

impl ConfigurationStore {
    /// Load the persisted target. A persisted value that no longer passes
    /// validation is an error rather than being silently dropped.
    #[instrument(skip_all)]
    pub fn open(persistence: impl TargetPersistence + 'static) -> Result<Self, StoreError> {
        let current = match persistence.load()? {
            Some(stored) => NotificationTarget::parse(&stored)?,
            None => NotificationTarget::ABSENT,
        };
        debug!(uri = %current, "Loaded notification target");
        Ok(Self {
            current: RwLock::new(current),
            persistence: Mutex::new(Box::new(persistence)),
        })
    }

    #[must_use]
    pub fn get(&self) -> NotificationTarget {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate without storing.
    pub fn check(candidate: &str) -> Result<(), ValidationError> {
        check_target_uri(candidate)
    }

    /// Validate, persist and publish a new target. Blank input clears it.
    #[instrument(skip(self))]
    pub fn update(&self, candidate: &str) -> Result<(), StoreError> {
        let target = NotificationTarget::parse(candidate)?;
        let persistence = self
            .persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        persistence.save(target.as_str())?;
        info!(uri = %target, "Notification target updated");
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = target;
        Ok(())
    }
}

impl TargetSource for ConfigurationStore {
    fn current_target(&self) -> NotificationTarget {
        self.get()
    }
}
