//! Log event identifiers.
//!
//! Every relay log line carries a stable numeric `event_id` so operators can
//! filter on it. The inbound worker owns the 2xxx range and the outbound worker
//! the 3xxx range.

use core::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayEvent {
    SmtpWorkerInitializing,
    SmtpWorkerValidating,
    SmtpWorkerValidated,
    SmtpWorkerValidationFailed,
    SmtpWorkerCancelling,
    SmtpWorkerStarting,
    SmtpWorkerStarted,
    SmtpWorkerStopping,
    SmtpWorkerStopped,
    SmtpWorkerMessageReceived,
    SmtpWorkerMessageAccepted,
    SmtpWorkerMessageRejected,
    SmtpWorkerMessageSaving,
    SmtpWorkerMessageQueuing,
    SmtpWorkerMessageQueued,
    SmtpWorkerUnknownError,

    GraphWorkerInitializing,
    GraphWorkerValidating,
    GraphWorkerValidated,
    GraphWorkerValidationFailed,
    GraphWorkerCancelling,
    GraphWorkerStarting,
    GraphWorkerStarted,
    GraphWorkerStopping,
    GraphWorkerStopped,
    GraphWorkerMessageDequeued,
    GraphWorkerRequestBuildStarted,
    GraphWorkerRequestBuildFinished,
    GraphWorkerRequestSending,
    GraphWorkerRequestComplete,
    GraphWorkerRequestCanceled,
    GraphWorkerRequestFaulted,
    GraphWorkerUnknownError,
}

impl RelayEvent {
    /// The numeric identifier attached to log lines as `event_id`.
    pub const fn id(self) -> u16 {
        match self {
            Self::SmtpWorkerInitializing => 2000,
            Self::SmtpWorkerValidating => 2001,
            Self::SmtpWorkerValidated => 2002,
            Self::SmtpWorkerValidationFailed => 2003,
            Self::SmtpWorkerCancelling => 2005,
            Self::SmtpWorkerStarting => 2006,
            Self::SmtpWorkerStarted => 2007,
            Self::SmtpWorkerStopping => 2008,
            Self::SmtpWorkerStopped => 2009,
            Self::SmtpWorkerMessageReceived => 2100,
            Self::SmtpWorkerMessageAccepted => 2101,
            Self::SmtpWorkerMessageRejected => 2102,
            Self::SmtpWorkerMessageSaving => 2103,
            Self::SmtpWorkerMessageQueuing => 2104,
            Self::SmtpWorkerMessageQueued => 2105,
            Self::SmtpWorkerUnknownError => 2999,

            Self::GraphWorkerInitializing => 3000,
            Self::GraphWorkerValidating => 3001,
            Self::GraphWorkerValidated => 3002,
            Self::GraphWorkerValidationFailed => 3003,
            Self::GraphWorkerCancelling => 3005,
            Self::GraphWorkerStarting => 3006,
            Self::GraphWorkerStarted => 3007,
            Self::GraphWorkerStopping => 3008,
            Self::GraphWorkerStopped => 3009,
            Self::GraphWorkerMessageDequeued => 3100,
            Self::GraphWorkerRequestBuildStarted => 3101,
            Self::GraphWorkerRequestBuildFinished => 3102,
            Self::GraphWorkerRequestSending => 3103,
            Self::GraphWorkerRequestComplete => 3104,
            Self::GraphWorkerRequestCanceled => 3900,
            Self::GraphWorkerRequestFaulted => 3901,
            Self::GraphWorkerUnknownError => 3999,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::SmtpWorkerInitializing => "SmtpWorkerInitializing",
            Self::SmtpWorkerValidating => "SmtpWorkerValidating",
            Self::SmtpWorkerValidated => "SmtpWorkerValidated",
            Self::SmtpWorkerValidationFailed => "SmtpWorkerValidationFailed",
            Self::SmtpWorkerCancelling => "SmtpWorkerCancelling",
            Self::SmtpWorkerStarting => "SmtpWorkerStarting",
            Self::SmtpWorkerStarted => "SmtpWorkerStarted",
            Self::SmtpWorkerStopping => "SmtpWorkerStopping",
            Self::SmtpWorkerStopped => "SmtpWorkerStopped",
            Self::SmtpWorkerMessageReceived => "SmtpWorkerMessageReceived",
            Self::SmtpWorkerMessageAccepted => "SmtpWorkerMessageAccepted",
            Self::SmtpWorkerMessageRejected => "SmtpWorkerMessageRejected",
            Self::SmtpWorkerMessageSaving => "SmtpWorkerMessageSaving",
            Self::SmtpWorkerMessageQueuing => "SmtpWorkerMessageQueuing",
            Self::SmtpWorkerMessageQueued => "SmtpWorkerMessageQueued",
            Self::SmtpWorkerUnknownError => "SmtpWorkerUnknownError",
            Self::GraphWorkerInitializing => "GraphWorkerInitializing",
            Self::GraphWorkerValidating => "GraphWorkerValidating",
            Self::GraphWorkerValidated => "GraphWorkerValidated",
            Self::GraphWorkerValidationFailed => "GraphWorkerValidationFailed",
            Self::GraphWorkerCancelling => "GraphWorkerCancelling",
            Self::GraphWorkerStarting => "GraphWorkerStarting",
            Self::GraphWorkerStarted => "GraphWorkerStarted",
            Self::GraphWorkerStopping => "GraphWorkerStopping",
            Self::GraphWorkerStopped => "GraphWorkerStopped",
            Self::GraphWorkerMessageDequeued => "GraphWorkerMessageDequeued",
            Self::GraphWorkerRequestBuildStarted => "GraphWorkerRequestBuildStarted",
            Self::GraphWorkerRequestBuildFinished => "GraphWorkerRequestBuildFinished",
            Self::GraphWorkerRequestSending => "GraphWorkerRequestSending",
            Self::GraphWorkerRequestComplete => "GraphWorkerRequestComplete",
            Self::GraphWorkerRequestCanceled => "GraphWorkerRequestCanceled",
            Self::GraphWorkerRequestFaulted => "GraphWorkerRequestFaulted",
            Self::GraphWorkerUnknownError => "GraphWorkerUnknownError",
        }
    }

    pub const fn is_inbound(self) -> bool {
        self.id() < 3000
    }
}

impl Display for RelayEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::RelayEvent;

    #[test]
    fn ids_are_partitioned_by_worker() {
        assert!(RelayEvent::SmtpWorkerMessageQueued.is_inbound());
        assert!(RelayEvent::SmtpWorkerUnknownError.is_inbound());
        assert!(!RelayEvent::GraphWorkerMessageDequeued.is_inbound());
        assert!(!RelayEvent::GraphWorkerUnknownError.is_inbound());
    }

    #[test]
    fn display_carries_id_and_name() {
        assert_eq!(
            RelayEvent::GraphWorkerRequestComplete.to_string(),
            "3104:GraphWorkerRequestComplete"
        );
        assert_eq!(
            RelayEvent::SmtpWorkerMessageRejected.to_string(),
            "2102:SmtpWorkerMessageRejected"
        );
    }

    #[test]
    fn lifecycle_events_keep_their_ids() {
        assert_eq!(RelayEvent::SmtpWorkerCancelling.id(), 2005);
        assert_eq!(RelayEvent::GraphWorkerStarting.id(), 3006);
        assert_eq!(RelayEvent::GraphWorkerStarted.id(), 3007);
    }

    #[test]
    fn terminal_outcomes_have_distinct_ids() {
        let ids = [
            RelayEvent::GraphWorkerRequestComplete.id(),
            RelayEvent::GraphWorkerRequestCanceled.id(),
            RelayEvent::GraphWorkerRequestFaulted.id(),
            RelayEvent::GraphWorkerUnknownError.id(),
        ];

        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
