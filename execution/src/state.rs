use anyhow::{anyhow, Result};
use lotto_types::{
    AuditEntry, CryptoPayment, Draw, DrawId, PaymentId, SettlementBatch, Ticket, TicketId,
};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;

/// Monotonic id sequences kept in state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sequence {
    Draw,
    DrawNumber,
    Ticket,
    Payment,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Sequence(Sequence),
    /// Every draw id in creation order.
    Draws,
    Draw(DrawId),
    DrawTickets(DrawId),
    Ticket(TicketId),
    Settlement(DrawId),
    /// Every payment id in submission order.
    Payments,
    Payment(PaymentId),
    PaymentByTxHash(String),
    PaymentAudit(PaymentId),
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Sequence(sequence) => write!(f, "sequence {sequence:?}"),
            Key::Draws => f.write_str("draw index"),
            Key::Draw(id) => write!(f, "draw {id}"),
            Key::DrawTickets(id) => write!(f, "tickets of draw {id}"),
            Key::Ticket(id) => write!(f, "ticket {id}"),
            Key::Settlement(id) => write!(f, "settlement of draw {id}"),
            Key::Payments => f.write_str("payment index"),
            Key::Payment(id) => write!(f, "payment {id}"),
            Key::PaymentByTxHash(hash) => write!(f, "tx hash {hash}"),
            Key::PaymentAudit(id) => write!(f, "audit of payment {id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Value {
    Sequence(u64),
    Ids(Vec<u64>),
    Draw(Draw),
    Ticket(Ticket),
    Settlement(SettlementBatch),
    Payment(CryptoPayment),
    PaymentId(PaymentId),
    Audit(Vec<AuditEntry>),
}

impl Value {
    /// Optimistic-lock token of a stored value.
    ///
    /// Index lists use their length since they only ever grow.
    pub fn version(&self) -> u64 {
        match self {
            Value::Sequence(next) => *next,
            Value::Ids(ids) => ids.len() as u64,
            Value::Draw(draw) => draw.version,
            Value::Payment(payment) => payment.version,
            Value::Audit(entries) => entries.len() as u64,
            Value::Ticket(_) | Value::Settlement(_) | Value::PaymentId(_) => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Status {
    Update(Value),
    /// Ids appended to whatever index list is current at commit time.
    Append(Vec<u64>),
}

/// A set of changes applied only if every guarded key still holds the version it was read
/// at (`None` meaning the key must still be absent).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    pub guards: Vec<(Key, Option<u64>)>,
    pub changes: Vec<(Key, Status)>,
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("guard failed on {key}")]
    Conflict { key: Key },
    #[error(transparent)]
    State(#[from] anyhow::Error),
}

/// Persistence collaborator for draws, tickets and payments.
///
/// Implementations must apply a [`Batch`] atomically: either every change becomes visible or
/// none does, and a failed guard leaves the store untouched. [`Status::Append`] needs no guard
/// and extends the list as it stands when the batch lands.
pub trait State: Send + Sync {
    fn get(&self, key: &Key) -> impl Future<Output = Result<Option<Value>>> + Send;
    fn commit(&self, batch: Batch) -> impl Future<Output = Result<(), CommitError>> + Send;
}

#[derive(Default)]
pub struct Memory {
    state: Mutex<HashMap<Key, Value>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().map(|state| state.len()).unwrap_or(0)
    }
}

impl State for Memory {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory state poisoned"))?;
        Ok(state.get(key).cloned())
    }

    async fn commit(&self, batch: Batch) -> Result<(), CommitError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory state poisoned"))?;
        for (key, expected) in &batch.guards {
            let current = state.get(key).map(Value::version);
            if current != *expected {
                return Err(CommitError::Conflict { key: key.clone() });
            }
        }
        for (key, status) in &batch.changes {
            if let (Status::Append(_), Some(other)) = (status, state.get(key)) {
                if !matches!(other, Value::Ids(_)) {
                    return Err(anyhow!("cannot append to {key}: {other:?}").into());
                }
            }
        }
        for (key, status) in batch.changes {
            match status {
                Status::Update(value) => {
                    state.insert(key, value);
                }
                Status::Append(extra) => {
                    if let Value::Ids(ids) =
                        state.entry(key).or_insert_with(|| Value::Ids(Vec::new()))
                    {
                        ids.extend(extra);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Buffers the writes of one transition on top of a [`State`].
///
/// Reads see pending writes first. Every read that reaches the underlying state records a
/// guard on the observed version, so [`Pending::commit`] fails if anything the transition
/// depended on changed in the meantime. Index appends are not reads and add no guard.
pub struct Pending<'a, S: State> {
    state: &'a S,
    guards: BTreeMap<Key, Option<u64>>,
    pending: BTreeMap<Key, Status>,
}

impl<'a, S: State> Pending<'a, S> {
    pub fn new(state: &'a S) -> Self {
        Self {
            state,
            guards: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub async fn get(&mut self, key: &Key) -> Result<Option<Value>> {
        if let Some(Status::Update(value)) = self.pending.get(key) {
            return Ok(Some(value.clone()));
        }
        let value = self.state.get(key).await?;
        self.guards
            .entry(key.clone())
            .or_insert_with(|| value.as_ref().map(Value::version));
        let Some(Status::Append(extra)) = self.pending.get(key) else {
            return Ok(value);
        };
        let mut ids = match value {
            Some(Value::Ids(ids)) => ids,
            None => Vec::new(),
            Some(other) => return Err(anyhow!("unexpected value under {key}: {other:?}")),
        };
        ids.extend(extra);
        Ok(Some(Value::Ids(ids)))
    }

    pub fn insert(&mut self, key: Key, value: Value) {
        self.pending.insert(key, Status::Update(value));
    }

    /// Append an id to an index list without reading it.
    pub fn push_id(&mut self, key: Key, id: u64) -> Result<()> {
        match self
            .pending
            .entry(key)
            .or_insert_with(|| Status::Append(Vec::new()))
        {
            Status::Update(Value::Ids(ids)) | Status::Append(ids) => {
                ids.push(id);
                Ok(())
            }
            Status::Update(other) => Err(anyhow!("cannot append to {other:?}")),
        }
    }

    pub async fn commit(self) -> Result<(), CommitError> {
        let batch = Batch {
            guards: self.guards.into_iter().collect(),
            changes: self.pending.into_iter().collect(),
        };
        self.state.commit(batch).await
    }
}

/// Attempts before [`allocate_id`] gives up on a contended sequence.
const ALLOCATION_ATTEMPTS: usize = 32;

/// Reserve the next id of a sequence (ids start at 1) in a commit of its own.
///
/// Transitions on unrelated entities share sequences, so allocation stays out of their
/// batches. An id reserved by a transition that later fails is skipped, never reused.
pub(crate) async fn allocate_id<S: State>(
    state: &S,
    sequence: Sequence,
) -> Result<u64, CommitError> {
    let key = Key::Sequence(sequence);
    for _ in 0..ALLOCATION_ATTEMPTS {
        let mut pending = Pending::new(state);
        let next = match pending.get(&key).await? {
            Some(Value::Sequence(next)) => next,
            None => 1,
            Some(other) => return Err(anyhow!("unexpected value under {key}: {other:?}").into()),
        };
        let after = next
            .checked_add(1)
            .ok_or_else(|| anyhow!("{key} exhausted"))?;
        pending.insert(key.clone(), Value::Sequence(after));
        match pending.commit().await {
            Ok(()) => return Ok(next),
            Err(CommitError::Conflict { .. }) => continue,
            Err(err) => return Err(err),
        }
    }
    Err(CommitError::Conflict { key })
}

pub(crate) async fn load_ids<S: State>(state: &S, key: &Key) -> Result<Vec<u64>> {
    match state.get(key).await? {
        Some(Value::Ids(ids)) => Ok(ids),
        None => Ok(Vec::new()),
        Some(other) => Err(anyhow!("unexpected value under {key}: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_reads_its_own_writes() {
        let state = Memory::new();
        let mut pending = Pending::new(&state);
        pending.push_id(Key::Draws, 7).unwrap();
        pending.push_id(Key::Draws, 8).unwrap();
        assert_eq!(
            pending.get(&Key::Draws).await.unwrap(),
            Some(Value::Ids(vec![7, 8]))
        );
        assert_eq!(state.len(), 0);

        pending.commit().await.unwrap();
        assert_eq!(load_ids(&state, &Key::Draws).await.unwrap(), vec![7, 8]);
    }

    #[tokio::test]
    async fn test_commit_fails_when_read_is_stale() {
        let state = Memory::new();
        let key = Key::Sequence(Sequence::DrawNumber);

        let mut first = Pending::new(&state);
        let mut second = Pending::new(&state);
        assert!(first.get(&key).await.unwrap().is_none());
        assert!(second.get(&key).await.unwrap().is_none());
        first.insert(key.clone(), Value::Sequence(2));
        second.insert(key.clone(), Value::Sequence(5));

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(
            err,
            CommitError::Conflict {
                key: Key::Sequence(Sequence::DrawNumber)
            }
        ));

        // The losing batch left nothing behind.
        assert_eq!(state.get(&key).await.unwrap(), Some(Value::Sequence(2)));
    }

    #[tokio::test]
    async fn test_absent_guard() {
        let state = Memory::new();
        let key = Key::PaymentByTxHash("0xabc".to_string());

        let mut first = Pending::new(&state);
        let mut second = Pending::new(&state);
        assert!(first.get(&key).await.unwrap().is_none());
        assert!(second.get(&key).await.unwrap().is_none());
        first.insert(key.clone(), Value::PaymentId(1));
        second.insert(key.clone(), Value::PaymentId(2));

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(CommitError::Conflict { .. })
        ));
        assert_eq!(state.get(&key).await.unwrap(), Some(Value::PaymentId(1)));
    }

    #[tokio::test]
    async fn test_appends_from_separate_batches_all_land() {
        let state = Memory::new();
        let mut first = Pending::new(&state);
        let mut second = Pending::new(&state);
        first.push_id(Key::Payments, 1).unwrap();
        second.push_id(Key::Payments, 2).unwrap();

        second.commit().await.unwrap();
        first.commit().await.unwrap();
        assert_eq!(load_ids(&state, &Key::Payments).await.unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_read_index_guards_against_appends() {
        let state = Memory::new();
        let key = Key::DrawTickets(1);

        let mut reader = Pending::new(&state);
        assert!(reader.get(&key).await.unwrap().is_none());
        reader.insert(Key::Draws, Value::Ids(vec![1]));

        let mut writer = Pending::new(&state);
        writer.push_id(key.clone(), 4).unwrap();
        writer.commit().await.unwrap();

        assert!(matches!(
            reader.commit().await,
            Err(CommitError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_append_to_non_index_changes_nothing() {
        let state = Memory::new();
        let mut setup = Pending::new(&state);
        setup.insert(Key::PaymentByTxHash("0x0".to_string()), Value::PaymentId(1));
        setup.commit().await.unwrap();

        let mut pending = Pending::new(&state);
        pending.insert(Key::PaymentByTxHash("0x1".to_string()), Value::PaymentId(2));
        pending
            .push_id(Key::PaymentByTxHash("0x0".to_string()), 9)
            .unwrap();
        assert!(matches!(
            pending.commit().await,
            Err(CommitError::State(_))
        ));
        assert_eq!(state.len(), 1);
    }

    #[tokio::test]
    async fn test_allocate_id_is_sequential_per_sequence() {
        let state = Memory::new();
        assert_eq!(allocate_id(&state, Sequence::Ticket).await.unwrap(), 1);
        assert_eq!(allocate_id(&state, Sequence::Ticket).await.unwrap(), 2);
        assert_eq!(allocate_id(&state, Sequence::Payment).await.unwrap(), 1);
        assert_eq!(
            state.get(&Key::Sequence(Sequence::Ticket)).await.unwrap(),
            Some(Value::Sequence(3))
        );
    }
}
