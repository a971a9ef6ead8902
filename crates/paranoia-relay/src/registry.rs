use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard, mpsc};
use uuid::Uuid;

use paranoia_types::{PairingToken, SignedReply};

use crate::error::RelayError;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Reply(SignedReply),
    Close { code: u16, reason: String },
}

/// Sending half of a connected client, as stored in a session slot.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnHandle {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a frame. Returns false once the connection's writer is gone.
    pub fn send(&self, frame: Outbound) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub fn reply(&self, reply: SignedReply) -> bool {
        self.send(Outbound::Reply(reply))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Opened the session
    A,
    /// Completed it
    B,
}

#[derive(Debug)]
struct ChatSession {
    slot_a: ConnHandle,
    slot_b: Option<ConnHandle>,
}

impl ChatSession {
    fn contains(&self, conn_id: Uuid) -> bool {
        self.slot_a.id == conn_id || self.slot_b.as_ref().is_some_and(|b| b.id == conn_id)
    }

    fn peer_of(&self, conn_id: Uuid) -> Option<&ConnHandle> {
        let slot_b = self.slot_b.as_ref()?;
        if self.slot_a.id == conn_id {
            Some(slot_b)
        } else if slot_b.id == conn_id {
            Some(&self.slot_a)
        } else {
            None
        }
    }
}

#[derive(Debug)]
enum SessionEntry {
    /// Entry created by a LINK that has not occupied it yet
    Vacant,
    Open(ChatSession),
    /// Torn down; waiters must look the token up again
    Closed,
}

type EntryRef = Arc<TokioMutex<SessionEntry>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub registered: u64,
    pub sessions: usize,
}

/// Token → session table.
///
/// Each token has its own async mutex; everything that reads or changes a
/// session does so through a [`SessionLock`] holding it. The table lock is
/// only taken to find or insert an entry and is never held across an await.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: Mutex<HashMap<PairingToken, EntryRef>>,

    /// Number of REGISTER commands seen (telemetry only)
    registered: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                registered: AtomicU64::new(0),
            }),
        }
    }

    /// Count a REGISTER. Returns the new total.
    pub fn record_registration(&self) -> u64 {
        self.inner.registered.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered: self.inner.registered.load(Ordering::Relaxed),
            sessions: self.table().len(),
        }
    }

    /// Lock the session for `token`, creating an empty entry if there is none.
    pub async fn lock_or_create(&self, token: &PairingToken) -> SessionLock {
        loop {
            let entry = self
                .table()
                .entry(token.clone())
                .or_insert_with(|| Arc::new(TokioMutex::new(SessionEntry::Vacant)))
                .clone();

            let guard = entry.clone().lock_owned().await;
            if matches!(*guard, SessionEntry::Closed) {
                // Torn down while we waited; the table no longer holds it.
                continue;
            }
            return SessionLock {
                registry: self.clone(),
                token: token.clone(),
                entry,
                guard,
            };
        }
    }

    /// Lock the session for `token` if one exists.
    pub async fn lock_existing(&self, token: &PairingToken) -> Option<SessionLock> {
        loop {
            let entry = self.table().get(token).cloned()?;

            let guard = entry.clone().lock_owned().await;
            if matches!(*guard, SessionEntry::Closed) {
                continue;
            }
            return Some(SessionLock {
                registry: self.clone(),
                token: token.clone(),
                entry,
                guard,
            });
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<PairingToken, EntryRef>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `token` from the table, but only if it still maps to `entry`.
    fn forget(&self, token: &PairingToken, entry: &EntryRef) {
        let mut table = self.table();
        if table.get(token).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            table.remove(token);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one token's session.
///
/// Dropping a lock whose entry was never occupied removes the entry again.
pub struct SessionLock {
    registry: Registry,
    token: PairingToken,
    entry: EntryRef,
    guard: OwnedMutexGuard<SessionEntry>,
}

impl SessionLock {
    /// The slot `conn_id` would get from [`SessionLock::occupy`], without
    /// taking it.
    pub fn vacancy(&self, conn_id: Uuid) -> Result<Slot, RelayError> {
        match &*self.guard {
            SessionEntry::Vacant => Ok(Slot::A),
            SessionEntry::Open(session) if session.contains(conn_id) => {
                Err(RelayError::AlreadyLinked)
            }
            SessionEntry::Open(session) if session.slot_b.is_none() => Ok(Slot::B),
            SessionEntry::Open(_) => Err(RelayError::SessionFull),
            SessionEntry::Closed => Err(RelayError::TokenNotFound),
        }
    }

    /// Put `conn` in the next free slot. A full session is never modified.
    pub fn occupy(&mut self, conn: ConnHandle) -> Result<Slot, RelayError> {
        let slot = self.vacancy(conn.id)?;
        match &mut *self.guard {
            SessionEntry::Open(session) => session.slot_b = Some(conn),
            entry => {
                *entry = SessionEntry::Open(ChatSession {
                    slot_a: conn,
                    slot_b: None,
                })
            }
        }
        Ok(slot)
    }

    /// Queue `reply` for whichever occupant is not `sender`.
    pub fn forward(&self, sender: Uuid, reply: SignedReply) -> Result<(), RelayError> {
        let SessionEntry::Open(session) = &*self.guard else {
            return Err(RelayError::TokenNotFound);
        };
        if session.slot_b.is_none() {
            return Err(RelayError::TokenNotFound);
        }
        let peer = session
            .peer_of(sender)
            .ok_or(RelayError::NotSessionMember)?;
        // A closed writer means the peer is already tearing the session down.
        peer.reply(reply);
        Ok(())
    }

    /// Tear the session down if `conn_id` occupies it. Returns the remaining
    /// occupant, if any, so the caller can notify it while still holding the lock.
    pub fn leave(&mut self, conn_id: Uuid) -> Option<ConnHandle> {
        let is_member = matches!(&*self.guard, SessionEntry::Open(session) if session.contains(conn_id));
        if !is_member {
            return None;
        }

        let SessionEntry::Open(session) = std::mem::replace(&mut *self.guard, SessionEntry::Closed)
        else {
            return None;
        };
        self.registry.forget(&self.token, &self.entry);

        if session.slot_a.id == conn_id {
            session.slot_b
        } else {
            Some(session.slot_a)
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if matches!(*self.guard, SessionEntry::Vacant) {
            *self.guard = SessionEntry::Closed;
            self.registry.forget(&self.token, &self.entry);
        }
    }
}
