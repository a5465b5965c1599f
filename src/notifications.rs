//! Durable, per-user local log of in-app notifications.
//!
//! Records are kept as a serialized list under
//! `local_settings(category = "notifications", key = user_id)` and are
//! independent of the remote store: the reconciliation loop and direct
//! user actions append here, and the bell badge subscribes to the unread
//! count. Every mutation is a read-modify-rewrite of the whole per-user
//! list, performed under the single connection lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{self, DbState};
use crate::errors::ClientError;

const CATEGORY: &str = "notifications";

/// In-process sequence for id generation. Guarantees uniqueness within a
/// process even at equal millisecond timestamps; collision across
/// process restarts at the same millisecond and counter is accepted as
/// negligible risk.
static NOTIFICATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Next listener handle id.
static LISTENER_SEQ: AtomicU64 = AtomicU64::new(0);

struct ListenerEntry {
    id: u64,
    user_id: String,
    callback: Box<dyn Fn(usize) + Send>,
}

/// Unread-count listeners, fanned out synchronously in registration
/// order after every mutating operation.
static LISTENERS: Mutex<Vec<ListenerEntry>> = Mutex::new(Vec::new());

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    /// "info", "success", "danger", or any free-form tag.
    #[serde(rename = "type")]
    pub kind: String,
    pub is_read: bool,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// The caller-supplied part of a record; id, user, read flag, and
/// timestamp are filled in by `add`.
#[derive(Debug, Clone, Default)]
pub struct NotificationInput {
    pub title: String,
    pub message: String,
    pub kind: String,
    pub order_id: Option<String>,
}

fn generate_id(user_id: &str) -> String {
    let prefix: String = user_id.chars().take(6).collect();
    let millis = Utc::now().timestamp_millis();
    let seq = NOTIFICATION_SEQ.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}-{millis}-{seq}")
}

/// The trailing in-process sequence of an id, for newest-first
/// tie-breaking at equal timestamps.
fn id_sequence(id: &str) -> u64 {
    id.rsplit('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn sort_newest_first(list: &mut [NotificationRecord]) {
    list.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| id_sequence(&b.id).cmp(&id_sequence(&a.id)))
    });
}

// ---------------------------------------------------------------------------
// List storage
// ---------------------------------------------------------------------------

fn require_user(user_id: &str) -> Result<(), ClientError> {
    if user_id.trim().is_empty() {
        return Err(ClientError::NotLoggedIn);
    }
    Ok(())
}

/// Run a mutation against the user's record list under the connection
/// lock, then report the resulting unread count to listeners.
fn with_list<R>(
    db: &DbState,
    user_id: &str,
    mutate: impl FnOnce(&mut Vec<NotificationRecord>) -> R,
) -> Result<R, ClientError> {
    require_user(user_id)?;
    let unread;
    let result;
    {
        let conn = db
            .conn
            .lock()
            .map_err(|_| ClientError::TransientWrite("local store lock poisoned".into()))?;
        let mut list = load_list(&conn, user_id);
        result = mutate(&mut list);
        let serialized = serde_json::to_string(&list)
            .map_err(|e| ClientError::TransientWrite(format!("encode notifications: {e}")))?;
        db::set_setting(&conn, CATEGORY, user_id, &serialized)?;
        unread = list.iter().filter(|n| !n.is_read).count();
    }
    notify_listeners(user_id, unread);
    Ok(result)
}

fn load_list(conn: &rusqlite::Connection, user_id: &str) -> Vec<NotificationRecord> {
    db::get_setting(conn, CATEGORY, user_id)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn read_list(db: &DbState, user_id: &str) -> Result<Vec<NotificationRecord>, ClientError> {
    require_user(user_id)?;
    let conn = db
        .conn
        .lock()
        .map_err(|_| ClientError::TransientWrite("local store lock poisoned".into()))?;
    Ok(load_list(&conn, user_id))
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Append a notification and return its id.
pub fn add(db: &DbState, user_id: &str, input: NotificationInput) -> Result<String, ClientError> {
    require_user(user_id)?;
    let record = NotificationRecord {
        id: generate_id(user_id),
        user_id: user_id.to_string(),
        title: input.title,
        message: input.message,
        kind: input.kind,
        is_read: false,
        created_at: Utc::now().to_rfc3339(),
        order_id: input.order_id,
    };
    let id = record.id.clone();
    debug!(id = %id, title = %record.title, "notification added");
    with_list(db, user_id, move |list| list.push(record))?;
    Ok(id)
}

/// All notifications for the user, newest first.
pub fn list(db: &DbState, user_id: &str) -> Result<Vec<NotificationRecord>, ClientError> {
    let mut records = read_list(db, user_id)?;
    sort_newest_first(&mut records);
    Ok(records)
}

/// Flip a single record to read. Unknown ids are a silent no-op.
pub fn mark_read(db: &DbState, user_id: &str, id: &str) -> Result<(), ClientError> {
    with_list(db, user_id, |list| {
        if let Some(record) = list.iter_mut().find(|n| n.id == id) {
            record.is_read = true;
        }
    })
}

pub fn mark_all_read(db: &DbState, user_id: &str) -> Result<(), ClientError> {
    with_list(db, user_id, |list| {
        for record in list.iter_mut() {
            record.is_read = true;
        }
    })
}

/// Remove a single record. Unknown ids are a silent no-op.
pub fn delete(db: &DbState, user_id: &str, id: &str) -> Result<(), ClientError> {
    with_list(db, user_id, |list| list.retain(|n| n.id != id))
}

pub fn clear_all(db: &DbState, user_id: &str) -> Result<(), ClientError> {
    with_list(db, user_id, |list| list.clear())
}

pub fn unread_count(db: &DbState, user_id: &str) -> Result<usize, ClientError> {
    Ok(read_list(db, user_id)?.iter().filter(|n| !n.is_read).count())
}

// ---------------------------------------------------------------------------
// Unread-count subscription
// ---------------------------------------------------------------------------

/// Handle for an unread-count listener; dropping it (or calling
/// `unsubscribe`) removes the listener.
pub struct UnreadSubscription {
    id: u64,
}

impl UnreadSubscription {
    pub fn unsubscribe(self) {
        // Removal happens in Drop.
    }
}

impl Drop for UnreadSubscription {
    fn drop(&mut self) {
        if let Ok(mut listeners) = LISTENERS.lock() {
            listeners.retain(|l| l.id != self.id);
        }
    }
}

/// Register an unread-count listener. The callback fires immediately
/// with the current count and again after every mutating operation for
/// this user.
pub fn subscribe_unread(
    db: &DbState,
    user_id: &str,
    callback: impl Fn(usize) + Send + 'static,
) -> Result<UnreadSubscription, ClientError> {
    require_user(user_id)?;
    let current = unread_count(db, user_id)?;
    callback(current);

    let id = LISTENER_SEQ.fetch_add(1, Ordering::SeqCst);
    LISTENERS
        .lock()
        .map_err(|_| ClientError::TransientWrite("listener registry lock poisoned".into()))?
        .push(ListenerEntry {
            id,
            user_id: user_id.to_string(),
            callback: Box::new(callback),
        });
    Ok(UnreadSubscription { id })
}

fn notify_listeners(user_id: &str, unread: usize) {
    let listeners = match LISTENERS.lock() {
        Ok(l) => l,
        Err(_) => return,
    };
    for listener in listeners.iter() {
        if listener.user_id == user_id {
            (listener.callback)(unread);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
