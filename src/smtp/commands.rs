// src/smtp/commands.rs

//! The SMTP command table.
//!
//! Commands form an ordered chain of verb handlers. A command line is split on
//! whitespace into a verb and its arguments; the first handler whose verb set
//! contains the verb executes. Handlers never touch the socket: they mutate
//! the `SmtpSession` and describe the reply lines and the next protocol state.

use super::session::SmtpSession;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::debug;

pub const REPLY_OK: &str = "250 OK";
pub const REPLY_BAD_SEQUENCE: &str = "503 Bad sequence of commands";
pub const REPLY_PARAM_NOT_IMPLEMENTED: &str = "504 Command parameter not implemented";
pub const REPLY_NOT_RECOGNIZED: &str = "500 Command not recognized";
pub const REPLY_LINE_TOO_LONG: &str = "500 Line too long";
pub const REPLY_START_MAIL_INPUT: &str = "354 Start mail input; end with <CRLF>.<CRLF>";
pub const REPLY_AUTH_OK: &str = "235 Authentication successful";
pub const REPLY_AUTH_FAILED: &str = "535 Authentication failed";
pub const REPLY_AUTH_CANCELLED: &str = "501 Authentication cancelled";
pub const REPLY_AUTH_NO_METHOD: &str = "501 Syntax error, no authentication method";
pub const REPLY_AUTH_UNKNOWN: &str = "504 Unrecognized authentication type";
/// The PLAIN continuation prompt carries no challenge.
pub const PROMPT_PLAIN: &str = "334 ";
/// `334` followed by base64 of "Username:".
pub const PROMPT_USERNAME: &str = "334 VXNlcm5hbWU6";
/// `334` followed by base64 of "Password:".
pub const PROMPT_PASSWORD: &str = "334 UGFzc3dvcmQ6";
pub const REPLY_GOODBYE: &str = "221 Goodbye!";

/// What a listener announces about itself in HELO/EHLO replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpIdentity {
    pub hostname: String,
    /// Adds `AUTH PLAIN LOGIN` to the EHLO capability list. AUTH is accepted
    /// either way.
    pub advertise_auth: bool,
}

impl SmtpIdentity {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            advertise_auth: false,
        }
    }

    pub fn with_auth_advertised(mut self, advertise_auth: bool) -> Self {
        self.advertise_auth = advertise_auth;
        self
    }
}

/// What the protocol should do once the replies have been sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextState {
    /// Keep reading commands.
    Continue,
    /// Switch to raw body capture until a lone `.` line.
    BeginData,
    /// The next line is a base64 PLAIN response.
    AwaitAuthPlain,
    /// The next line is a base64 LOGIN username.
    AwaitLoginUsername,
    /// The next line is a base64 LOGIN password.
    AwaitLoginPassword { username_ok: bool },
    /// Close the connection.
    Close,
}

/// The outcome of executing one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub replies: Vec<String>,
    pub next: NextState,
}

impl CommandResult {
    fn reply(line: impl Into<String>) -> Self {
        Self {
            replies: vec![line.into()],
            next: NextState::Continue,
        }
    }

    fn with_next(line: impl Into<String>, next: NextState) -> Self {
        Self {
            replies: vec![line.into()],
            next,
        }
    }
}

/// A handler in the command chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo,
    Send,
    Rcpt,
    Data,
    Auth,
    Session,
    NotImplemented,
}

/// The order in which handlers are tried.
pub const COMMAND_CHAIN: [SmtpCommand; 7] = [
    SmtpCommand::Ehlo,
    SmtpCommand::Send,
    SmtpCommand::Rcpt,
    SmtpCommand::Data,
    SmtpCommand::Auth,
    SmtpCommand::Session,
    SmtpCommand::NotImplemented,
];

impl SmtpCommand {
    /// The upper-case verbs this handler accepts.
    pub fn verbs(&self) -> &'static [&'static str] {
        match self {
            SmtpCommand::Ehlo => &["HELO", "EHLO"],
            SmtpCommand::Send => &["MAIL", "SEND", "SOML", "SAML"],
            SmtpCommand::Rcpt => &["RCPT"],
            SmtpCommand::Data => &["DATA"],
            SmtpCommand::Auth => &["AUTH"],
            SmtpCommand::Session => &["RSET", "NOOP", "QUIT"],
            SmtpCommand::NotImplemented => &["VRFY", "EXPN", "HELP", "TURN"],
        }
    }

    /// Walks the chain and returns the first handler accepting `verb`.
    pub fn find(verb: &str) -> Option<SmtpCommand> {
        let verb = verb.to_ascii_uppercase();
        COMMAND_CHAIN
            .into_iter()
            .find(|command| command.verbs().contains(&verb.as_str()))
    }

    pub fn execute(
        &self,
        verb: &str,
        args: &[&str],
        session: &mut SmtpSession,
        identity: &SmtpIdentity,
    ) -> CommandResult {
        let verb = verb.to_ascii_uppercase();
        match self {
            SmtpCommand::Ehlo => execute_ehlo(&verb, args, session, identity),
            SmtpCommand::Send => execute_mail(args, session),
            SmtpCommand::Rcpt => execute_rcpt(args, session),
            SmtpCommand::Data => {
                if !session.ready_for_data() {
                    return CommandResult::reply(REPLY_BAD_SEQUENCE);
                }
                CommandResult::with_next(REPLY_START_MAIL_INPUT, NextState::BeginData)
            }
            SmtpCommand::Auth => execute_auth(args),
            SmtpCommand::Session => match verb.as_str() {
                "RSET" => {
                    session.reset();
                    CommandResult::reply(REPLY_OK)
                }
                "QUIT" => CommandResult::with_next(REPLY_GOODBYE, NextState::Close),
                _ => CommandResult::reply(REPLY_OK),
            },
            SmtpCommand::NotImplemented => match verb.as_str() {
                "VRFY" => CommandResult::reply(
                    "252 Cannot VRFY user, but will accept message and attempt delivery",
                ),
                _ => CommandResult::reply("502 Command not implemented"),
            },
        }
    }
}

/// Splits a command line and runs it through the chain.
pub fn dispatch(line: &str, session: &mut SmtpSession, identity: &SmtpIdentity) -> CommandResult {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return CommandResult::reply(REPLY_NOT_RECOGNIZED);
    };
    let args: Vec<&str> = parts.collect();

    match SmtpCommand::find(verb) {
        Some(command) => {
            debug!("Dispatching {} to {:?} handler.", verb, command);
            command.execute(verb, &args, session, identity)
        }
        None => CommandResult::reply(REPLY_NOT_RECOGNIZED),
    }
}

fn execute_ehlo(
    verb: &str,
    args: &[&str],
    session: &mut SmtpSession,
    identity: &SmtpIdentity,
) -> CommandResult {
    session.reset();
    session.sender = Some(args.join(" "));

    if verb == "HELO" {
        return CommandResult::reply(format!("250 {}", identity.hostname));
    }
    let mut replies = vec![
        format!("250-{}", identity.hostname),
        "250-8BITMIME".to_string(),
        "250-SMTPUTF8".to_string(),
    ];
    if identity.advertise_auth {
        replies.push("250-AUTH PLAIN LOGIN".to_string());
    }
    replies.push(REPLY_OK.to_string());
    CommandResult {
        replies,
        next: NextState::Continue,
    }
}

fn execute_mail(args: &[&str], session: &mut SmtpSession) -> CommandResult {
    if !session.has_sender() {
        return CommandResult::reply(REPLY_BAD_SEQUENCE);
    }
    let Some(path) = parse_path(args, "FROM") else {
        return CommandResult::reply(REPLY_PARAM_NOT_IMPLEMENTED);
    };

    session.reset();
    session.use_utf8 = path.wants_utf8();
    let reply = format!("250 <{}> OK", path.address);
    session.mail_from = Some(path.address);
    CommandResult::reply(reply)
}

fn execute_rcpt(args: &[&str], session: &mut SmtpSession) -> CommandResult {
    if !session.has_sender() || !session.has_mail_from() {
        return CommandResult::reply(REPLY_BAD_SEQUENCE);
    }
    let Some(path) = parse_path(args, "TO") else {
        return CommandResult::reply(REPLY_PARAM_NOT_IMPLEMENTED);
    };
    if path.address.is_empty() {
        return CommandResult::reply(REPLY_PARAM_NOT_IMPLEMENTED);
    }

    session.add_recipient(&path.address);
    CommandResult::reply(format!("250 <{}> OK", path.address))
}

fn execute_auth(args: &[&str]) -> CommandResult {
    let Some(mechanism) = args.first() else {
        return CommandResult::reply(REPLY_AUTH_NO_METHOD);
    };
    let initial = args.get(1).copied();

    match mechanism.to_ascii_uppercase().as_str() {
        "PLAIN" => match initial {
            Some(response) => CommandResult::reply(auth_reply(check_plain(response))),
            None => CommandResult::with_next(PROMPT_PLAIN, NextState::AwaitAuthPlain),
        },
        "LOGIN" => match initial {
            Some(username) => CommandResult::with_next(
                PROMPT_PASSWORD,
                NextState::AwaitLoginPassword {
                    username_ok: decode_login_username(username).is_some(),
                },
            ),
            None => CommandResult::with_next(PROMPT_USERNAME, NextState::AwaitLoginUsername),
        },
        _ => CommandResult::reply(REPLY_AUTH_UNKNOWN),
    }
}

pub fn auth_reply(accepted: bool) -> &'static str {
    if accepted {
        REPLY_AUTH_OK
    } else {
        REPLY_AUTH_FAILED
    }
}

/// A client's response to a `334` prompt that aborts the exchange.
pub fn is_auth_cancel(line: &str) -> bool {
    line.trim() == "*"
}

/// Checks a base64 PLAIN response (`authzid NUL authcid NUL passwd`).
/// Any non-empty user name is accepted; credentials are not verified.
pub fn check_plain(response: &str) -> bool {
    let Ok(decoded) = STANDARD.decode(response.trim()) else {
        return false;
    };
    let mut fields = decoded.split(|&b| b == 0);
    let (Some(_authzid), Some(authcid), Some(_password)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return false;
    };
    !authcid.is_empty()
}

/// Decodes a LOGIN user name, rejecting invalid base64 and empty names.
pub fn decode_login_username(response: &str) -> Option<String> {
    let decoded = STANDARD.decode(response.trim()).ok()?;
    let username = String::from_utf8_lossy(&decoded).into_owned();
    (!username.is_empty()).then_some(username)
}

/// A LOGIN password only needs to be valid base64; it may be empty.
pub fn check_login_password(response: &str) -> bool {
    STANDARD.decode(response.trim()).is_ok()
}

/// A reverse or forward path parsed from `FROM:<addr> [params]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailPath {
    pub address: String,
    pub params: Vec<String>,
}

impl MailPath {
    /// True when the client announced an 8-bit or UTF-8 body.
    pub fn wants_utf8(&self) -> bool {
        self.params.iter().any(|param| {
            matches!(
                param.to_ascii_uppercase().as_str(),
                "BODY=8BITMIME" | "SMTPUTF8" | "BODY=SMTPUTF8"
            )
        })
    }
}

/// Parses `<keyword>:<path> [params...]` from the argument tokens. Tolerates
/// a space after the colon and a missing pair of angle brackets.
pub fn parse_path(args: &[&str], keyword: &str) -> Option<MailPath> {
    let joined = args.join(" ");
    let (head, rest) = joined.split_once(':')?;
    if !head.trim().eq_ignore_ascii_case(keyword) {
        return None;
    }

    let mut tokens = rest.split_whitespace();
    let raw = tokens.next().unwrap_or("");
    let address = raw
        .strip_prefix('<')
        .map(|s| s.strip_suffix('>').unwrap_or(s))
        .unwrap_or(raw)
        .to_string();

    Some(MailPath {
        address,
        params: tokens.map(str::to_string).collect(),
    })
}
