use crate::Database;
use crate::error::StoreError;
use crate::models::{MessageRow, UserRow};
use rusqlite::{Connection, OptionalExtension};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, role) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, role),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Messages --

    /// Persist a message in one transaction: the message row, the recipient
    /// snapshot ("all users except the sender", frozen here and never
    /// recomputed), and the sender's own read marker.
    ///
    /// Returns the stored row (sender name resolved) and the snapshotted
    /// recipient ids for fan-out.
    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        body: &str,
        encrypted_body: Option<&str>,
        is_encrypted: bool,
    ) -> Result<(MessageRow, Vec<String>), StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO messages (id, sender_id, body, encrypted_body, is_encrypted)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, sender_id, body, encrypted_body, is_encrypted],
            )?;

            tx.execute(
                "INSERT INTO message_recipients (message_id, user_id)
                 SELECT ?1, id FROM users WHERE id != ?2",
                (id, sender_id),
            )?;

            tx.execute(
                "INSERT INTO message_reads (message_id, user_id) VALUES (?1, ?2)",
                (id, sender_id),
            )?;

            let row = query_message(&tx, id)?.ok_or(StoreError::NotFound)?;

            let recipients = {
                let mut stmt = tx.prepare(
                    "SELECT user_id FROM message_recipients WHERE message_id = ?1",
                )?;
                stmt.query_map([id], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?
            };

            tx.commit()?;
            Ok((row, recipients))
        })
    }

    pub fn recent_messages(&self, limit: u32) -> Result<Vec<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            // JOIN users to fetch sender_username in a single query; rowid
            // breaks ties between messages created within the same second
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender_id, u.username, m.body, m.encrypted_body,
                        m.is_encrypted, m.created_at
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?1",
            )?;

            let rows = stmt
                .query_map([limit], map_message_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Read-on-view: mark every listed message read for the viewer in one
    /// idempotent batch. Only messages the viewer is a recipient of are
    /// touched, so a sender listing their own messages changes nothing.
    pub fn mark_messages_read(
        &self,
        user_id: &str,
        message_ids: &[String],
    ) -> Result<usize, StoreError> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (0..message_ids.len()).map(|i| format!("?{}", i + 2)).collect();
            let sql = format!(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id)
                 SELECT mr.message_id, ?1 FROM message_recipients mr
                 WHERE mr.user_id = ?1 AND mr.message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id];
            params.extend(
                message_ids
                    .iter()
                    .map(|id| id as &dyn rusqlite::types::ToSql),
            );

            let inserted = stmt.execute(params.as_slice())?;
            Ok(inserted)
        })
    }

    /// Acknowledge one message. Idempotent for repeat calls; the caller must
    /// be in the frozen recipient set.
    pub fn mark_read(&self, message_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let exists: Option<i64> = conn
                .query_row("SELECT 1 FROM messages WHERE id = ?1", [message_id], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound);
            }

            let is_recipient: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM message_recipients WHERE message_id = ?1 AND user_id = ?2",
                    (message_id, user_id),
                    |row| row.get(0),
                )
                .optional()?;
            if is_recipient.is_none() {
                return Err(StoreError::NotRecipient);
            }

            conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id) VALUES (?1, ?2)",
                (message_id, user_id),
            )?;
            Ok(())
        })
    }

    /// Count of messages addressed to the user that carry no read marker
    /// from them yet.
    pub fn unread_count(&self, user_id: &str) -> Result<u32, StoreError> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*)
                 FROM message_recipients mr
                 LEFT JOIN message_reads r
                    ON r.message_id = mr.message_id AND r.user_id = mr.user_id
                 WHERE mr.user_id = ?1 AND r.user_id IS NULL",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Who has acknowledged a message so far.
    pub fn readers(&self, message_id: &str) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM message_reads WHERE message_id = ?1")?;
            let ids = stmt
                .query_map([message_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    /// Remove a message outright. Recipient and read rows go with it via
    /// cascade; nothing else is affected.
    pub fn delete_message(
        &self,
        message_id: &str,
        requester_id: &str,
        requester_is_admin: bool,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let sender_id: Option<String> = conn
                .query_row(
                    "SELECT sender_id FROM messages WHERE id = ?1",
                    [message_id],
                    |row| row.get(0),
                )
                .optional()?;

            let sender_id = sender_id.ok_or(StoreError::NotFound)?;
            if sender_id != requester_id && !requester_is_admin {
                return Err(StoreError::NotSender);
            }

            conn.execute("DELETE FROM messages WHERE id = ?1", [message_id])?;
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, field: &str, value: &str) -> Result<Option<UserRow>, StoreError> {
    // `field` is one of two compile-time literals, never user input
    let sql = format!(
        "SELECT id, username, password, role, created_at FROM users WHERE {} = ?1",
        field
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                role: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.sender_id, u.username, m.body, m.encrypted_body,
                m.is_encrypted, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.id = ?1",
    )?;

    let row = stmt.query_row([id], map_message_row).optional()?;
    Ok(row)
}

fn map_message_row(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_username: row
            .get::<_, Option<String>>(2)?
            .unwrap_or_else(|| "unknown".to_string()),
        body: row.get(3)?,
        encrypted_body: row.get(4)?,
        is_encrypted: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::error::StoreError;
    use uuid::Uuid;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, username, "hash", "member").unwrap();
        id
    }

    fn send(db: &Database, sender: &str, body: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_message(&id, sender, body, None, false).unwrap();
        id
    }

    #[test]
    fn recipients_are_all_other_users() {
        let db = test_db();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");
        let c = add_user(&db, "carol");

        let mid = Uuid::new_v4().to_string();
        let (row, recipients) = db.insert_message(&mid, &a, "hi", None, false).unwrap();

        assert_eq!(row.sender_username, "alice");
        assert_eq!(recipients.len(), 2);
        assert!(recipients.contains(&b));
        assert!(recipients.contains(&c));
        assert!(!recipients.contains(&a));
    }

    #[test]
    fn recipient_set_is_frozen_at_send_time() {
        let db = test_db();
        let a = add_user(&db, "alice");
        add_user(&db, "bob");

        let mid = send(&db, &a, "before dave");

        // dave registers after the message exists
        let d = add_user(&db, "dave");

        assert_eq!(db.unread_count(&d).unwrap(), 0);
        assert!(matches!(
            db.mark_read(&mid, &d),
            Err(StoreError::NotRecipient)
        ));
    }

    #[test]
    fn sender_has_read_their_own_message() {
        let db = test_db();
        let a = add_user(&db, "alice");
        add_user(&db, "bob");

        let mid = send(&db, &a, "hello");
        let readers = db.readers(&mid).unwrap();
        assert_eq!(readers, vec![a]);
    }

    #[test]
    fn mark_read_is_idempotent_and_monotone() {
        let db = test_db();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");

        let mid = send(&db, &a, "hello");
        assert_eq!(db.readers(&mid).unwrap().len(), 1);

        db.mark_read(&mid, &b).unwrap();
        assert_eq!(db.readers(&mid).unwrap().len(), 2);

        // repeat acknowledgement changes nothing
        db.mark_read(&mid, &b).unwrap();
        assert_eq!(db.readers(&mid).unwrap().len(), 2);
        assert_eq!(db.unread_count(&b).unwrap(), 0);
    }

    #[test]
    fn mark_read_unknown_message_is_not_found() {
        let db = test_db();
        let a = add_user(&db, "alice");
        assert!(matches!(
            db.mark_read(&Uuid::new_v4().to_string(), &a),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn unread_count_tracks_recipients_without_markers() {
        let db = test_db();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");
        let c = add_user(&db, "carol");

        let m1 = send(&db, &a, "one");
        send(&db, &a, "two");

        assert_eq!(db.unread_count(&b).unwrap(), 2);
        assert_eq!(db.unread_count(&c).unwrap(), 2);
        assert_eq!(db.unread_count(&a).unwrap(), 0);

        db.mark_read(&m1, &b).unwrap();
        assert_eq!(db.unread_count(&b).unwrap(), 1);
        assert_eq!(db.unread_count(&c).unwrap(), 2);
    }

    #[test]
    fn read_on_view_marks_only_addressed_messages() {
        let db = test_db();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");

        let m1 = send(&db, &a, "from alice");
        let m2 = send(&db, &b, "from bob");

        let ids = vec![m1.clone(), m2.clone()];
        db.mark_messages_read(&b, &ids).unwrap();

        // b was a recipient of m1 only; m2 is b's own message
        assert_eq!(db.unread_count(&b).unwrap(), 0);
        let m1_readers = db.readers(&m1).unwrap();
        assert!(m1_readers.contains(&b));
        assert_eq!(db.readers(&m2).unwrap(), vec![b]);
        // a never viewed anything
        assert_eq!(db.unread_count(&a).unwrap(), 1);
    }

    #[test]
    fn recent_messages_newest_first_and_bounded() {
        let db = test_db();
        let a = add_user(&db, "alice");
        add_user(&db, "bob");

        for i in 0..5 {
            send(&db, &a, &format!("msg {}", i));
        }

        let rows = db.recent_messages(3).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].body, "msg 4");
        assert_eq!(rows[1].body, "msg 3");
        assert_eq!(rows[2].body, "msg 2");
    }

    #[test]
    fn delete_requires_sender_or_admin() {
        let db = test_db();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");

        let mid = send(&db, &a, "to be removed");

        assert!(matches!(
            db.delete_message(&mid, &b, false),
            Err(StoreError::NotSender)
        ));

        // admin may delete someone else's message
        db.delete_message(&mid, &b, true).unwrap();
        assert!(matches!(
            db.delete_message(&mid, &a, false),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn delete_by_sender_removes_derived_rows() {
        let db = test_db();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");

        let mid = send(&db, &a, "short-lived");
        assert_eq!(db.unread_count(&b).unwrap(), 1);

        db.delete_message(&mid, &a, false).unwrap();
        assert_eq!(db.unread_count(&b).unwrap(), 0);
        assert!(db.readers(&mid).unwrap().is_empty());
    }
}
