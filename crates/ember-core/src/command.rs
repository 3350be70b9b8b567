// ── Command dispatch ──
//
// Write operations flow through a single `Command` enum routed to the
// service's reducers. Dispatch is fire-and-forget: effects come back
// as delta events, never as a return value.

use ember_remote::Connection;

use crate::error::CoreError;

/// All write operations this layer can request.
#[derive(Debug, Clone)]
pub enum Command {
    CreateProfile { display_name: String },
    RenameProfile { display_name: String },
    RecordPull { card_ref: u32 },
    MarkUnlockSeen { unlock_id: u64 },
}

/// Route a command to the matching reducer call.
pub(crate) fn dispatch(conn: &Connection, cmd: &Command) -> Result<(), CoreError> {
    let reducers = conn.reducers();
    let result = match cmd {
        Command::CreateProfile { display_name } => reducers.create_profile(display_name),
        Command::RenameProfile { display_name } => reducers.rename_profile(display_name),
        Command::RecordPull { card_ref } => reducers.record_pull(*card_ref),
        Command::MarkUnlockSeen { unlock_id } => reducers.mark_unlock_seen(*unlock_id),
    };
    result.map_err(CoreError::from)
}
