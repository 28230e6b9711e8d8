use crate::smtp::command::Command;

/// Where a session is in the SMTP dialogue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum State {
    #[default]
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
    Closed,
}

impl State {
    /// Whether `command` is acceptable in this state.
    pub const fn permits(self, command: &Command) -> bool {
        match command {
            Command::Helo(_) | Command::Noop | Command::Rset | Command::Quit => {
                !matches!(self, Self::Closed)
            }
            Command::MailFrom { .. } => matches!(self, Self::Greeted),
            Command::RcptTo(_) => matches!(self, Self::MailFrom | Self::RcptTo),
            Command::Data => matches!(self, Self::RcptTo),
        }
    }

    /// The state after `command` has been accepted.
    #[must_use]
    pub const fn transition(self, command: &Command) -> Self {
        match command {
            Command::Helo(_) => Self::Greeted,
            Command::Rset => match self {
                Self::Connected => Self::Connected,
                _ => Self::Greeted,
            },
            Command::MailFrom { .. } => Self::MailFrom,
            Command::RcptTo(_) => Self::RcptTo,
            Command::Data => Self::Greeted,
            Command::Quit => Self::Closed,
            Command::Noop => self,
        }
    }
}
