use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error as ThisError;
use tokio::time::{Duration, Instant};

use crate::stream::{AppendError, Stream, StreamId};

/// The Store is responsible for managing key-value pairs. String values may carry a deadline,
/// which is only checked when the key is read; nothing is purged in the background.
///
/// The store is designed to be thread-safe, allowing it to be shared and cloned cheaply using
/// reference counting. Every operation runs under a single lock, so a check followed by a
/// write on the same guard is atomic with respect to all other connections.
#[derive(Clone)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn new() -> Store {
        let state = State {
            keys: HashMap::new(),
        };

        let inner = Arc::new(InnerStore {
            state: Mutex::new(state),
        });

        Self { inner }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InnerStore {
    state: Mutex<State>,
}

/// Exclusive access to the store for the duration of one operation.
pub struct InnerStoreLocked<'a> {
    state: MutexGuard<'a, State>,
    // Sampled once when the lock is taken so every expiry check in an operation agrees.
    now: Instant,
}

impl<'a> InnerStoreLocked<'a> {
    /// Stores a string under `key`, replacing whatever value was there, including its deadline.
    pub fn set(&mut self, key: Key, data: Bytes, ttl: Option<Duration>) {
        // Deadlines beyond what the clock can represent never expire.
        let expires_at = ttl.and_then(|ttl| self.now.checked_add(ttl));
        let value = Value::String { data, expires_at };

        self.state.keys.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        match self.state.keys.get(key) {
            None => Err(StoreError::NotFound),
            Some(Value::Stream(_)) => Err(StoreError::TypeMismatch),
            Some(Value::String { expires_at, .. }) if is_expired(*expires_at, self.now) => {
                Err(StoreError::Expired)
            }
            Some(Value::String { data, .. }) => Ok(data.clone()),
        }
    }

    /// Reports which kind of value `key` holds. Deadlines are not consulted: a string past its
    /// deadline still reports `string` until it is overwritten.
    pub fn type_of(&self, key: &str) -> ValueType {
        self.state
            .keys
            .get(key)
            .map(Value::value_type)
            .unwrap_or(ValueType::None)
    }

    /// Appends an entry to the stream at `key`, creating the stream if the key is absent.
    ///
    /// The id is validated against the stream's last entry and appended under the same guard,
    /// so no other writer can slip an entry in between.
    pub fn stream_append(
        &mut self,
        key: &str,
        id: StreamId,
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<StreamId, StoreError> {
        if id.is_zero() {
            return Err(StoreError::ZeroId);
        }

        let now = self.now;
        match self.state.keys.get_mut(key) {
            Some(Value::Stream(stream)) => stream.append(id, fields)?,
            Some(Value::String { expires_at, .. }) if !is_expired(*expires_at, now) => {
                return Err(StoreError::TypeMismatch);
            }
            // Absent, or a string that has already expired and so no longer counts.
            _ => {
                let mut stream = Stream::new();
                stream.append(id, fields)?;
                self.state
                    .keys
                    .insert(key.to_string(), Value::Stream(stream));
            }
        }

        Ok(id)
    }

    /// The stream stored at `key`, if `key` holds one.
    pub fn stream(&self, key: &str) -> Option<&Stream> {
        match self.state.keys.get(key) {
            Some(Value::Stream(stream)) => Some(stream),
            _ => None,
        }
    }

    /// Number of keys, expired ones included until they are overwritten.
    pub fn len(&self) -> usize {
        self.state.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.keys.is_empty()
    }
}

fn is_expired(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_some_and(|expires_at| expires_at <= now)
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl InnerStore {
    pub fn lock(&self) -> InnerStoreLocked<'_> {
        // Every operation leaves the map consistent before anything that could panic, so a
        // poisoned lock is still safe to use.
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        InnerStoreLocked {
            state,
            now: Instant::now(),
        }
    }
}

type Key = String;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String {
        data: Bytes,
        expires_at: Option<Instant>,
    },
    Stream(Stream),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String { .. } => ValueType::String,
            Value::Stream(_) => ValueType::Stream,
        }
    }
}

/// Type tag reported by `TYPE`. `None` stands for a missing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    None,
    String,
    Stream,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::None => "none",
            ValueType::String => "string",
            ValueType::Stream => "stream",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct State {
    keys: HashMap<Key, Value>,
}

/// Errors returned by store operations. The messages are the ones sent back to clients.
#[derive(Debug, ThisError, PartialEq)]
pub enum StoreError {
    #[error("ERR no such key")]
    NotFound,
    #[error("ERR key has expired")]
    Expired,
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    TypeMismatch,
    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    ZeroId,
    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    NonMonotonicId,
}

impl From<AppendError> for StoreError {
    fn from(err: AppendError) -> Self {
        match err {
            AppendError::ZeroId => StoreError::ZeroId,
            AppendError::NotGreaterThanLast { .. } => StoreError::NonMonotonicId,
        }
    }
}
