use core::fmt::{self, Display, Formatter};

/// SMTP reply codes used by the server.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    ServiceReady,
    GoodBye,
    Ok,
    StartMailInput,
    Unavailable,
    ActionUnavailable,
    SyntaxError,
    InvalidParameters,
    InvalidCommandSequence,
    Error,
    ExceededStorage,
    MailboxNameNotAllowed,
    TransactionFailed,
    Unknown(u16),
}

impl Status {
    /// Checks if the status is a permanent rejection
    pub fn is_permanent(self) -> bool {
        u16::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&u16::from(self))
    }
}

impl From<u16> for Status {
    fn from(value: u16) -> Self {
        match value {
            220 => Self::ServiceReady,
            221 => Self::GoodBye,
            250 => Self::Ok,
            354 => Self::StartMailInput,
            421 => Self::Unavailable,
            451 => Self::ActionUnavailable,
            500 => Self::SyntaxError,
            501 => Self::InvalidParameters,
            503 => Self::InvalidCommandSequence,
            550 => Self::Error,
            552 => Self::ExceededStorage,
            553 => Self::MailboxNameNotAllowed,
            554 => Self::TransactionFailed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u16 {
    fn from(value: Status) -> Self {
        match value {
            Status::ServiceReady => 220,
            Status::GoodBye => 221,
            Status::Ok => 250,
            Status::StartMailInput => 354,
            Status::Unavailable => 421,
            Status::ActionUnavailable => 451,
            Status::SyntaxError => 500,
            Status::InvalidParameters => 501,
            Status::InvalidCommandSequence => 503,
            Status::Error => 550,
            Status::ExceededStorage => 552,
            Status::MailboxNameNotAllowed => 553,
            Status::TransactionFailed => 554,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", u16::from(*self))
    }
}
