//! Notification repository for the `notifications` table.
//!
//! Append-only apart from the status column, which only the recipient may
//! change.

use rescue_core::status::NotificationStatus;
use rescue_core::{NotificationId, Participant, RequestId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{Result, StoreError};
use crate::sqlite::row_types::{NewNotification, NotificationRow, now, text_column};

const COLUMNS: &str = "notification_id, recipient_id, recipient_type, sender_id, sender_type,
                       notification_type, title, message, req_id, bid_amount, original_amount,
                       status, created_at, pickup_location, destination, driver_name,
                       driver_mobile, rider_name";

/// Notification repository: stateless, every method takes `&Connection`.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Append an unread notification.
    pub fn insert(conn: &Connection, new: &NewNotification) -> Result<NotificationId> {
        let _ = conn.execute(
            "INSERT INTO notifications
                 (recipient_id, recipient_type, sender_id, sender_type, notification_type,
                  title, message, req_id, bid_amount, original_amount, status, created_at,
                  pickup_location, destination, driver_name, driver_mobile, rider_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'unread', ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                new.recipient_id,
                new.recipient_type.as_str(),
                new.sender_id,
                new.sender_type.as_str(),
                new.notification_type.as_str(),
                new.title,
                new.message,
                new.req_id.map(RequestId::get),
                new.bid_amount,
                new.original_amount,
                now(),
                new.pickup_location,
                new.destination,
                new.driver_name,
                new.driver_mobile,
                new.rider_name
            ],
        )?;
        Ok(NotificationId::new(conn.last_insert_rowid()))
    }

    /// Get a notification by ID.
    pub fn get(conn: &Connection, id: NotificationId) -> Result<Option<NotificationRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM notifications WHERE notification_id = ?1"),
                params![id.get()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// A recipient's notifications, newest first.
    pub fn list_for_recipient(
        conn: &Connection,
        recipient: Participant,
        status: Option<NotificationStatus>,
    ) -> Result<Vec<NotificationRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM notifications
             WHERE recipient_type = ?1 AND recipient_id = ?2 AND (?3 IS NULL OR status = ?3)
             ORDER BY created_at DESC, notification_id DESC"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    recipient.role.as_str(),
                    recipient.id,
                    status.map(|s| s.as_str())
                ],
                Self::map_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count a recipient's notifications in a status.
    pub fn count_for_recipient(
        conn: &Connection,
        recipient: Participant,
        status: NotificationStatus,
    ) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM notifications
             WHERE recipient_type = ?1 AND recipient_id = ?2 AND status = ?3",
            params![recipient.role.as_str(), recipient.id, status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Change the status of a notification owned by `recipient`.
    ///
    /// A notification addressed to someone else is reported as not found.
    pub fn set_status(
        conn: &Connection,
        id: NotificationId,
        recipient: Participant,
        status: NotificationStatus,
    ) -> Result<NotificationRow> {
        let changed = conn.execute(
            "UPDATE notifications SET status = ?1
             WHERE notification_id = ?2 AND recipient_type = ?3 AND recipient_id = ?4",
            params![status.as_str(), id.get(), recipient.role.as_str(), recipient.id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("notification", id));
        }
        Self::get(conn, id)?.ok_or_else(|| StoreError::not_found("notification", id))
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
        Ok(NotificationRow {
            notification_id: NotificationId::new(row.get(0)?),
            recipient_id: row.get(1)?,
            recipient_type: text_column(row, 2)?,
            sender_id: row.get(3)?,
            sender_type: text_column(row, 4)?,
            notification_type: text_column(row, 5)?,
            title: row.get(6)?,
            message: row.get(7)?,
            req_id: row.get::<_, Option<i64>>(8)?.map(RequestId::new),
            bid_amount: row.get(9)?,
            original_amount: row.get(10)?,
            status: text_column(row, 11)?,
            created_at: row.get(12)?,
            pickup_location: row.get(13)?,
            destination: row.get(14)?,
            driver_name: row.get(15)?,
            driver_mobile: row.get(16)?,
            rider_name: row.get(17)?,
        })
    }
}
