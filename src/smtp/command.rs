use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use thiserror::Error;

use crate::address::Mailbox;

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl HeloVariant {
    pub fn name(&self) -> &str {
        match self {
            Self::Ehlo(name) | Self::Helo(name) => name,
        }
    }
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ehlo(name) => write!(f, "EHLO {name}"),
            Self::Helo(name) => write!(f, "HELO {name}"),
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    /// A `sender` of `None` is the null reverse-path (`MAIL FROM:<>`).
    MailFrom {
        sender: Option<Mailbox>,
        size: Option<usize>,
    },
    RcptTo(Mailbox),
    Data,
    Rset,
    Noop,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Command not recognized")]
    Unknown(String),

    #[error("{0}")]
    Syntax(&'static str),
}

/// Split `<path> PARAM=VALUE ...` into the bracketed path and its parameters.
fn split_path(argument: &str) -> (&str, &str) {
    let argument = argument.trim();

    if let Some(rest) = argument.strip_prefix('<') {
        if let Some(end) = rest.find('>') {
            return (&rest[..end], rest[end + 1..].trim());
        }
    }

    argument
        .split_once(char::is_whitespace)
        .map_or((argument, ""), |(path, params)| (path, params.trim()))
}

fn parse_size(params: &str) -> Result<Option<usize>, CommandError> {
    params
        .split_whitespace()
        .find_map(|param| {
            param
                .split_once('=')
                .filter(|(key, _)| key.eq_ignore_ascii_case("SIZE"))
                .map(|(_, value)| value)
        })
        .map(|value| {
            value
                .parse::<usize>()
                .map_err(|_| CommandError::Syntax("Syntax error in SIZE parameter"))
        })
        .transpose()
}

/// The text after `VERB` when it is followed by `:` (e.g. `MAIL FROM:`).
fn argument_after<'a>(command: &'a str, prefix: &str) -> Option<&'a str> {
    let head = command.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| command[prefix.len()..].trim_start())
        .and_then(|rest| rest.strip_prefix(':'))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let command = line.trim_end_matches(['\r', '\n']).trim();
        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let argument = command[command.len().min(verb.len())..].trim();

        match verb.as_str() {
            "EHLO" | "HELO" if argument.is_empty() => {
                Err(CommandError::Syntax("Syntax: EHLO hostname"))
            }
            "EHLO" => Ok(Self::Helo(HeloVariant::Ehlo(argument.to_string()))),
            "HELO" => Ok(Self::Helo(HeloVariant::Helo(argument.to_string()))),
            "MAIL" => {
                let argument = argument_after(command, "MAIL FROM")
                    .ok_or(CommandError::Syntax("Syntax: MAIL FROM:<address>"))?;
                let (path, params) = split_path(argument);
                let size = parse_size(params)?;

                let sender = if path.is_empty() {
                    None
                } else {
                    Some(
                        Mailbox::parse(path)
                            .map_err(|_| CommandError::Syntax("Invalid sender address"))?,
                    )
                };

                Ok(Self::MailFrom { sender, size })
            }
            "RCPT" => {
                let argument = argument_after(command, "RCPT TO")
                    .ok_or(CommandError::Syntax("Syntax: RCPT TO:<address>"))?;
                let (path, _) = split_path(argument);

                Mailbox::parse(path)
                    .map(Self::RcptTo)
                    .map_err(|_| CommandError::Syntax("Invalid recipient address"))
            }
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => Ok(Self::Quit),
            _ => Err(CommandError::Unknown(command.to_string())),
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = CommandError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(value)
            .map_err(|_| CommandError::Syntax("Unable to interpret command"))
            .and_then(Self::from_str)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(variant) => Display::fmt(variant, f),
            Self::MailFrom { sender, .. } => write!(
                f,
                "MAIL FROM:<{}>",
                sender.as_ref().map(Mailbox::address).unwrap_or_default()
            ),
            Self::RcptTo(rcpt) => write!(f, "RCPT TO:<{}>", rcpt.address()),
            Self::Data => f.write_str("DATA"),
            Self::Rset => f.write_str("RSET"),
            Self::Noop => f.write_str("NOOP"),
            Self::Quit => f.write_str("QUIT"),
        }
    }
}
