//! Command frame parser.
//!
//! A command frame is a run of tokens separated by `_`:
//!
//! ```text
//! CMDSTART_<drone id>_<command>[_<argument>]
//! ```
//!
//! The parser only classifies the frame and captures the raw argument.
//! Converting the argument (to an altitude, a trajectory mode, …) is left to
//! the command handlers, and payload bytes are left to the
//! [`Transmission`][crate::transmission::Transmission] state machine.

/// First token of every frame.
pub const START_MARKER: &[u8] = b"CMDSTART";

/// Token separator.
pub const DELIMITER: u8 = b'_';

/// Marks the end of a streamed payload.
pub const SENTINEL: &[u8] = b"_EOF";

/// First byte of a payload document.
pub const PAYLOAD_OPEN: u8 = b'{';

pub const NO_COMMAND_REPLY: &[u8] = b"No command was given.";
pub const MALFORMED_START_REPLY: &[u8] = b"Frames must start with CMDSTART.";
pub const UNKNOWN_COMMAND_REPLY: &[u8] = b"Unknown command.";

/// The commands a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `takeoff[_<altitude m>]`
    Takeoff,
    /// `land`
    Land,
    /// `traj_<relative|absolute>` followed by a `{…}_EOF` payload.
    Trajectory,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [
        CommandKind::Takeoff,
        CommandKind::Land,
        CommandKind::Trajectory,
    ];

    /// Wire name of the command.
    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Takeoff => "takeoff",
            CommandKind::Land => "land",
            CommandKind::Trajectory => "traj",
        }
    }

    pub fn from_name(name: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name().as_bytes() == name)
    }

    /// Whether the token after the command name is its argument.
    pub fn expects_argument(self) -> bool {
        match self {
            CommandKind::Takeoff | CommandKind::Trajectory => true,
            CommandKind::Land => false,
        }
    }

    /// Whether a payload transfer follows the frame.
    pub fn has_payload(self) -> bool {
        matches!(self, CommandKind::Trajectory)
    }
}

/// A recognised frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub kind: CommandKind,
    pub argument: Option<String>,
}

/// Result of parsing one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Nothing but whitespace.
    NoCommand,
    /// The chunk does not start with [`START_MARKER`] and a drone id.
    MalformedStart,
    /// Well formed, but the command name is not known.
    UnknownCommand,
    Parsed(ParsedCommand),
}

impl ParseOutcome {
    /// The fixed reply for a parse failure, `None` for a parsed command.
    pub fn diagnostic(&self) -> Option<&'static [u8]> {
        match self {
            ParseOutcome::NoCommand => Some(NO_COMMAND_REPLY),
            ParseOutcome::MalformedStart => Some(MALFORMED_START_REPLY),
            ParseOutcome::UnknownCommand => Some(UNKNOWN_COMMAND_REPLY),
            ParseOutcome::Parsed(_) => None,
        }
    }
}

/// Classify a raw chunk.
pub fn parse_command(chunk: &[u8]) -> ParseOutcome {
    let chunk = chunk.trim_ascii();
    if chunk.is_empty() {
        return ParseOutcome::NoCommand;
    }

    let mut tokens = chunk.split(|&b| b == DELIMITER);
    if tokens.next() != Some(START_MARKER) {
        return ParseOutcome::MalformedStart;
    }
    // Drone id: required, otherwise unused.
    if tokens.next().is_none() {
        return ParseOutcome::MalformedStart;
    }

    let Some(kind) = tokens.next().and_then(CommandKind::from_name) else {
        return ParseOutcome::UnknownCommand;
    };

    let argument = if kind.expects_argument() {
        tokens
            .next()
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
    } else {
        None
    };

    ParseOutcome::Parsed(ParsedCommand { kind, argument })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(kind: CommandKind, argument: Option<&str>) -> ParseOutcome {
        ParseOutcome::Parsed(ParsedCommand {
            kind,
            argument: argument.map(str::to_string),
        })
    }

    #[test]
    fn empty_and_whitespace_are_no_command() {
        assert_eq!(parse_command(b""), ParseOutcome::NoCommand);
        assert_eq!(parse_command(b" \r\n\t"), ParseOutcome::NoCommand);
    }

    #[test]
    fn wrong_start_marker_is_malformed() {
        assert_eq!(parse_command(b"CMDSTOP_04_land"), ParseOutcome::MalformedStart);
        assert_eq!(parse_command(b"hello"), ParseOutcome::MalformedStart);
        assert_eq!(parse_command(b"cmdstart_04_land"), ParseOutcome::MalformedStart);
    }

    #[test]
    fn missing_drone_id_is_malformed() {
        assert_eq!(parse_command(b"CMDSTART"), ParseOutcome::MalformedStart);
    }

    #[test]
    fn unknown_or_missing_command_name() {
        assert_eq!(parse_command(b"CMDSTART_04_flip"), ParseOutcome::UnknownCommand);
        assert_eq!(parse_command(b"CMDSTART_04"), ParseOutcome::UnknownCommand);
        assert_eq!(parse_command(b"CMDSTART_04_"), ParseOutcome::UnknownCommand);
    }

    #[test]
    fn takeoff_with_and_without_argument() {
        assert_eq!(
            parse_command(b"CMDSTART_04_takeoff_0.8\n"),
            parsed(CommandKind::Takeoff, Some("0.8"))
        );
        assert_eq!(
            parse_command(b"CMDSTART_04_takeoff"),
            parsed(CommandKind::Takeoff, None)
        );
    }

    #[test]
    fn argument_is_captured_verbatim() {
        assert_eq!(
            parse_command(b"CMDSTART_04_takeoff_abc"),
            parsed(CommandKind::Takeoff, Some("abc"))
        );
    }

    #[test]
    fn land_ignores_extra_tokens() {
        assert_eq!(
            parse_command(b"CMDSTART_04_land_now"),
            parsed(CommandKind::Land, None)
        );
    }

    #[test]
    fn traj_captures_mode_and_ignores_payload() {
        let outcome = parse_command(b"CMDSTART_04_traj_relative_{\"points\":[[0,[0,0,0]]]}_EOF");
        assert_eq!(outcome, parsed(CommandKind::Trajectory, Some("relative")));
    }

    #[test]
    fn diagnostics_are_distinct() {
        let replies = [
            ParseOutcome::NoCommand.diagnostic(),
            ParseOutcome::MalformedStart.diagnostic(),
            ParseOutcome::UnknownCommand.diagnostic(),
        ];
        assert!(replies.iter().all(Option::is_some));
        assert_ne!(replies[0], replies[1]);
        assert_ne!(replies[1], replies[2]);
        assert_ne!(replies[0], replies[2]);
        assert!(parsed(CommandKind::Land, None).diagnostic().is_none());
    }

    #[test]
    fn dispatch_table_flags() {
        assert!(CommandKind::Trajectory.has_payload());
        assert!(!CommandKind::Takeoff.has_payload());
        assert!(!CommandKind::Land.expects_argument());
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_name(kind.name().as_bytes()), Some(kind));
        }
    }
}
