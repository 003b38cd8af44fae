/// Result of applying a dispatch sequence number to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceUpdate {
    /// The sequence moved forward (or was the first one seen).
    Advanced { previous: Option<u64> },
    /// The sequence was at or below the current one; the event must be dropped.
    Stale { current: u64 },
    /// The envelope carried no sequence; state is unchanged.
    Missing,
}

impl SequenceUpdate {
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        !matches!(self, Self::Stale { .. })
    }
}

/// Identity of the current streaming session.
///
/// Lives for the whole gateway run and survives resumable reconnects; it is
/// mutated only by the supervisor task (directly or through the router).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    session_id: Option<String>,
    resume_url: Option<String>,
    sequence: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    user_id: Option<String>,
}

impl SessionState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            session_id: None,
            resume_url: None,
            sequence: None,
            heartbeat_interval_ms: None,
            user_id: None,
        }
    }

    /// Records the identity handed out by a Ready event.
    pub fn begin_session(
        &mut self,
        session_id: String,
        resume_url: Option<String>,
        user_id: Option<String>,
    ) {
        self.session_id = Some(session_id);
        self.resume_url = resume_url;
        if user_id.is_some() {
            self.user_id = user_id;
        }
    }

    /// Applies the sequence of an inbound dispatch.
    ///
    /// Sequences at or below the current value are rejected and leave the
    /// state untouched.
    pub fn apply_sequence(&mut self, sequence: Option<u64>) -> SequenceUpdate {
        let Some(sequence) = sequence else {
            return SequenceUpdate::Missing;
        };

        match self.sequence {
            Some(current) if sequence <= current => SequenceUpdate::Stale { current },
            previous => {
                self.sequence = Some(sequence);
                SequenceUpdate::Advanced { previous }
            }
        }
    }

    pub const fn set_heartbeat_interval(&mut self, interval_ms: u64) {
        self.heartbeat_interval_ms = Some(interval_ms);
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    #[must_use]
    pub const fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    #[must_use]
    pub const fn heartbeat_interval_ms(&self) -> Option<u64> {
        self.heartbeat_interval_ms
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    #[must_use]
    pub const fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    /// Drops every field. Only valid right before a fresh Identify.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
