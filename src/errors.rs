//! Typed error hierarchy for the finetune controller.
//!
//! - `StoreError`: state-store client failures
//! - `OwnerReferenceError`: controller-reference construction failures
//! - `ReconcileError`: a single reconcile invocation
//! - `ControllerError`: the host runtime that drives the reconciler

use std::time::Duration;

use thiserror::Error;

use crate::api::ObjectKey;

/// Errors returned by a state-store client.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: ObjectKey },

    #[error(
        "Operation cannot be fulfilled on {kind} {key}: the object has been modified \
         (observed version {observed}, current version {current})"
    )]
    Conflict {
        kind: String,
        key: ObjectKey,
        observed: String,
        current: String,
    },

    #[error("Invalid {kind} object: {message}")]
    Invalid { kind: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Errors from building a controller owner reference.
#[derive(Debug, Error)]
pub enum OwnerReferenceError {
    #[error("Owner {kind} {key} has no uid; it must be persisted before it can own objects")]
    MissingUid { kind: String, key: ObjectKey },

    #[error(
        "Cross-namespace owner references are disallowed: owner namespace {owner_namespace}, \
         object namespace {object_namespace}"
    )]
    NamespaceMismatch {
        owner_namespace: String,
        object_namespace: String,
    },

    #[error("Object {object} is already owned by another controller {kind} {name}")]
    AlreadyOwned {
        object: ObjectKey,
        kind: String,
        name: String,
    },
}

/// Errors from a single reconcile invocation. Every variant is retryable.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to {operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Failed to set controller reference: {0}")]
    OwnerReference(#[from] OwnerReferenceError),

    #[error("Reconcile cancelled before completion")]
    Cancelled,
}

impl ReconcileError {
    pub fn store(operation: &'static str, source: StoreError) -> Self {
        Self::Store { operation, source }
    }

    /// Returns the underlying store error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors from the controller runtime.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Timed out after {timeout:?} waiting for the store to sync")]
    CacheSyncTimeout { timeout: Duration },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid controller configuration: {0}")]
    InvalidConfig(String),
}
