//! Classification of inbound lines against the pending command.
//!
//! Reply prefixes are shared by many commands (`+OK` answers most writes),
//! so a line can only be interpreted together with the command currently
//! awaiting a reply. The rules are data: an ordered table where the first
//! row whose line prefix and pending-command constraint both apply decides
//! what happens to the line. Supporting a new firmware reply means adding a
//! row, not touching the I/O loop.

use std::fmt::Write as _;

/// Constraint on the pending command for a [`Rule`] to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Awaiting {
    /// The pending command is exactly this text.
    Exactly(&'static str),
    /// The pending command starts with one of these prefixes.
    StartsWith(&'static [&'static str]),
    /// Any pending command.
    Any,
}

impl Awaiting {
    fn admits(&self, pending: &str) -> bool {
        match self {
            Awaiting::Exactly(command) => pending == *command,
            Awaiting::StartsWith(prefixes) => prefixes.iter().any(|p| pending.starts_with(p)),
            Awaiting::Any => true,
        }
    }
}

/// How the reply payload is cut out of a matching line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extract {
    /// The whole line.
    Line,
    /// Up to `len` bytes starting at `offset`; shorter lines yield what is
    /// there.
    After { offset: usize, len: usize },
    /// `len` hex digits starting at `offset`, decoded, byte order reversed,
    /// and rendered as a colon-separated MAC address.
    ReversedMac { offset: usize, len: usize },
}

/// What a matching line does to the pending command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Complete the command with the extracted payload.
    Deliver(Extract),
    /// Intermediate acknowledgement: logged, the command keeps waiting.
    Acknowledge,
    /// Complete the command with a modem error.
    Fail,
}

/// One row of the classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    /// Line prefix.
    pub prefix: &'static str,
    /// Whether the line must equal `prefix` rather than start with it.
    pub exact: bool,
    /// Constraint on the pending command.
    pub when: Awaiting,
    /// Effect of a match.
    pub action: Action,
}

impl Rule {
    fn matches(&self, line: &str, pending: &str) -> bool {
        let prefix_ok = if self.exact {
            line == self.prefix
        } else {
            line.starts_with(self.prefix)
        };
        prefix_ok && self.when.admits(pending)
    }
}

/// Commands answered by a bare `+OK`.
const OK_WRITES: &[&str] = &[
    "AT+BAND=",
    "AT+MODE=",
    "AT+APPEUI=",
    "AT+APPKEY=",
    "AT+CTX",
    "AT+UTX",
];

/// Credential writes beyond the OTAA pair, also answered by `+OK`.
const OK_CREDENTIAL_WRITES: &[&str] = &[
    "AT+DEVEUI=",
    "AT+DEVADDR=",
    "AT+NWKSKEY=",
    "AT+IDNWK=",
    "AT+APPSKEY=",
];

/// The modem's reply rules, in evaluation order.
pub static RULES: &[Rule] = &[
    Rule {
        prefix: "+OK",
        exact: true,
        when: Awaiting::Exactly("AT"),
        action: Action::Deliver(Extract::Line),
    },
    Rule {
        prefix: "+OK=",
        exact: false,
        when: Awaiting::StartsWith(&["AT+DEV?"]),
        action: Action::Deliver(Extract::After { offset: 4, len: 7 }),
    },
    Rule {
        prefix: "+OK=",
        exact: false,
        when: Awaiting::StartsWith(&["AT+VER?"]),
        action: Action::Deliver(Extract::After { offset: 4, len: 5 }),
    },
    Rule {
        prefix: "+OK=",
        exact: false,
        when: Awaiting::StartsWith(&["AT+DEVEUI?"]),
        action: Action::Deliver(Extract::After { offset: 4, len: 16 }),
    },
    Rule {
        prefix: "+OK",
        exact: false,
        when: Awaiting::StartsWith(OK_WRITES),
        action: Action::Deliver(Extract::Line),
    },
    Rule {
        prefix: "+OK",
        exact: false,
        when: Awaiting::StartsWith(OK_CREDENTIAL_WRITES),
        action: Action::Deliver(Extract::Line),
    },
    Rule {
        prefix: "+ACK",
        exact: false,
        when: Awaiting::StartsWith(&["AT+JOIN"]),
        action: Action::Acknowledge,
    },
    Rule {
        prefix: "+EVENT=1,1",
        exact: false,
        when: Awaiting::StartsWith(&["AT+JOIN"]),
        action: Action::Deliver(Extract::Line),
    },
    Rule {
        prefix: "+RRBDRES",
        exact: false,
        when: Awaiting::StartsWith(&["AT+JRBD"]),
        action: Action::Deliver(Extract::ReversedMac { offset: 9, len: 12 }),
    },
    Rule {
        prefix: "+ERR",
        exact: false,
        when: Awaiting::Any,
        action: Action::Fail,
    },
];

/// Outcome of classifying one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// The line answers the pending command with this payload.
    Matched(Vec<u8>),
    /// The modem rejected the pending command; holds the raw line.
    ModemError(String),
    /// An intermediate acknowledgement of the pending command.
    Acknowledged,
    /// The line answers the pending command but its payload is malformed.
    Invalid(String),
    /// No rule applies (or nothing is pending).
    Unhandled,
}

/// Classify `line` against the built-in [`RULES`].
pub fn classify(line: &str, pending: Option<&str>) -> Classified {
    classify_with(RULES, line, pending)
}

/// Classify `line` against an arbitrary rule table.
///
/// With nothing pending every line is [`Classified::Unhandled`]: a late
/// reply must never complete a command issued after it.
pub fn classify_with(rules: &[Rule], line: &str, pending: Option<&str>) -> Classified {
    let Some(pending) = pending else {
        return Classified::Unhandled;
    };

    match rules.iter().find(|rule| rule.matches(line, pending)) {
        Some(rule) => match rule.action {
            Action::Deliver(extract) => match extract_payload(line, extract) {
                Ok(payload) => Classified::Matched(payload),
                Err(reason) => Classified::Invalid(reason),
            },
            Action::Acknowledge => Classified::Acknowledged,
            Action::Fail => Classified::ModemError(line.to_string()),
        },
        None => Classified::Unhandled,
    }
}

/// Byte range of `line`, clamped to its length.
fn field(line: &str, offset: usize, len: usize) -> &[u8] {
    let bytes = line.as_bytes();
    let start = offset.min(bytes.len());
    let end = offset.saturating_add(len).min(bytes.len());
    &bytes[start..end]
}

fn extract_payload(line: &str, extract: Extract) -> Result<Vec<u8>, String> {
    match extract {
        Extract::Line => Ok(line.as_bytes().to_vec()),
        Extract::After { offset, len } => Ok(field(line, offset, len).to_vec()),
        Extract::ReversedMac { offset, len } => {
            let digits = field(line, offset, len);
            if digits.len() != len {
                return Err(format!("MAC field too short in {:?}", line));
            }
            let mut octets = hex::decode(digits)
                .map_err(|e| format!("MAC field is not hex in {:?}: {}", line, e))?;
            octets.reverse();

            let mut mac = String::with_capacity(octets.len() * 3);
            for (i, octet) in octets.iter().enumerate() {
                if i > 0 {
                    mac.push(':');
                }
                let _ = write!(mac, "{:02X}", octet);
            }
            Ok(mac.into_bytes())
        }
    }
}
