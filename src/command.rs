//! Wire commands
//!
//! A frame is `name:arg:arg:...`. Inbound names map onto the closed
//! `Command` enum; anything else is a `ProtocolError::UnknownCommand`.
//! Arguments stay raw strings here. Handlers parse them.

use crate::error::ProtocolError;

/// Fields of a `b` content frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContent {
    pub created_at: String,
    /// Registered sender name, empty otherwise
    pub name: String,
    /// Temporary sender name, empty otherwise
    pub temp_name: String,
    pub session_id: String,
    pub unique_id: String,
    pub pending_id: String,
    pub ip: String,
    pub channels: String,
    /// Markup body; may itself contain `:`
    pub raw: String,
}

/// Fields of a `participant` frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantRecord {
    /// `0` left, `1` joined, `2` identity changed
    pub status: String,
    pub connection_id: String,
    pub session_id: String,
    /// `None` when not registered
    pub name: String,
    /// `None` when not using a temporary name
    pub temp_name: String,
    pub joined_at: String,
}

/// Fields of `blocked` / `unblocked`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockRecord {
    pub unique_id: String,
    pub ip: String,
    pub name: String,
    pub session_id: String,
    pub server_time: String,
}

/// Fields of the `ok` join acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinAck {
    pub owner: String,
    pub session_id: String,
    pub session_status: String,
    pub username: String,
    pub server_time: String,
    pub ip: String,
    pub moderators: String,
    pub server_id: String,
}

/// Inbound commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ok(JoinAck),
    /// `i`: history replay line
    History,
    /// `nomore`: history replay finished
    HistoryEnd,
    Inited,
    PasswordOk,
    AliasOk,
    Relogin,
    Denied,
    BadLogin,
    BadAlias,
    ParticipantCount { count_hex: String },
    Message(MessageContent),
    MessageId { pending_id: String, final_id: String },
    Mods { list: String },
    Participants { unregistered_count: String, records: String },
    Participant(ParticipantRecord),
    SpamBanWarning,
    SpamBan,
    FloodBanWarning,
    FloodBan { seconds: String },
    FloodBanTimeout { seconds: String },
    RateLimited { server_time: String, request: String },
    Delete { message_id: String },
    DeleteAll { message_ids: Vec<String> },
    Blocked(BlockRecord),
    Unblocked(BlockRecord),
}

/// Positional arguments; missing ones read as `""`
struct Args<'a> {
    fields: Vec<&'a str>,
}

impl<'a> Args<'a> {
    fn get(&self, index: usize) -> String {
        self.fields.get(index).copied().unwrap_or_default().to_string()
    }

    /// Fields from `index` on, rejoined with `:`
    fn rest(&self, index: usize) -> String {
        self.fields.get(index..).map(|f| f.join(":")).unwrap_or_default()
    }
}

impl Command {
    /// Parse one frame
    ///
    /// Returns `Ok(None)` for the empty keepalive pong.
    pub fn parse(frame: &str) -> Result<Option<Command>, ProtocolError> {
        let mut fields = frame.split(':');
        let name = fields.next().unwrap_or_default();
        if name.is_empty() {
            return Ok(None);
        }
        let a = Args {
            fields: fields.collect(),
        };

        let command = match name {
            "ok" => Command::Ok(JoinAck {
                owner: a.get(0),
                session_id: a.get(1),
                session_status: a.get(2),
                username: a.get(3),
                server_time: a.get(4),
                ip: a.get(5),
                moderators: a.get(6),
                server_id: a.get(7),
            }),
            "i" => Command::History,
            "nomore" => Command::HistoryEnd,
            "inited" => Command::Inited,
            "pwdok" => Command::PasswordOk,
            "aliasok" => Command::AliasOk,
            "relogin" => Command::Relogin,
            "denied" => Command::Denied,
            "badlogin" => Command::BadLogin,
            "badalias" => Command::BadAlias,
            "n" => Command::ParticipantCount { count_hex: a.get(0) },
            "b" => Command::Message(MessageContent {
                created_at: a.get(0),
                name: a.get(1),
                temp_name: a.get(2),
                session_id: a.get(3),
                unique_id: a.get(4),
                pending_id: a.get(5),
                ip: a.get(6),
                channels: a.get(7),
                raw: a.rest(9),
            }),
            "u" => Command::MessageId {
                pending_id: a.get(0),
                final_id: a.get(1),
            },
            "mods" => Command::Mods { list: a.rest(0) },
            "gparticipants" => Command::Participants {
                unregistered_count: a.get(0),
                records: a.rest(1),
            },
            "participant" => Command::Participant(ParticipantRecord {
                status: a.get(0),
                connection_id: a.get(1),
                session_id: a.get(2),
                name: a.get(3),
                temp_name: a.get(4),
                joined_at: a.get(6),
            }),
            "show_nlp" => Command::SpamBanWarning,
            "nlptb" => Command::SpamBan,
            "show_fw" => Command::FloodBanWarning,
            "show_tb" => Command::FloodBan { seconds: a.get(0) },
            "tb" => Command::FloodBanTimeout { seconds: a.get(0) },
            "climited" => Command::RateLimited {
                server_time: a.get(0),
                request: a.rest(1),
            },
            "delete" => Command::Delete { message_id: a.get(0) },
            "deleteall" => Command::DeleteAll {
                message_ids: a.fields.iter().map(|s| s.to_string()).collect(),
            },
            "blocked" => Command::Blocked(block_record(&a)),
            "unblocked" => Command::Unblocked(block_record(&a)),
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }

    /// Wire name, for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ok(_) => "ok",
            Command::History => "i",
            Command::HistoryEnd => "nomore",
            Command::Inited => "inited",
            Command::PasswordOk => "pwdok",
            Command::AliasOk => "aliasok",
            Command::Relogin => "relogin",
            Command::Denied => "denied",
            Command::BadLogin => "badlogin",
            Command::BadAlias => "badalias",
            Command::ParticipantCount { .. } => "n",
            Command::Message(_) => "b",
            Command::MessageId { .. } => "u",
            Command::Mods { .. } => "mods",
            Command::Participants { .. } => "gparticipants",
            Command::Participant(_) => "participant",
            Command::SpamBanWarning => "show_nlp",
            Command::SpamBan => "nlptb",
            Command::FloodBanWarning => "show_fw",
            Command::FloodBan { .. } => "show_tb",
            Command::FloodBanTimeout { .. } => "tb",
            Command::RateLimited { .. } => "climited",
            Command::Delete { .. } => "delete",
            Command::DeleteAll { .. } => "deleteall",
            Command::Blocked(_) => "blocked",
            Command::Unblocked(_) => "unblocked",
        }
    }
}

fn block_record(a: &Args<'_>) -> BlockRecord {
    BlockRecord {
        unique_id: a.get(0),
        ip: a.get(1),
        name: a.get(2),
        session_id: a.get(3),
        server_time: a.get(4),
    }
}

/// Outbound commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Join request
    Auth { room: String, session_id: String },
    Login { name: String, password: Option<String> },
    GetParticipants,
    /// Turn on background rendering for our messages
    EnableBackground,
    Message { nonce: String, body: String },
    DeleteMessage { message_id: String },
    DeleteAll { unique_id: String, ip: String, name: String },
    Block { unique_id: String, ip: String, name: String },
    RemoveBlock { unique_id: String, ip: String },
}

impl Outbound {
    pub fn to_frame(&self) -> String {
        match self {
            Outbound::Auth { room, session_id } => format!("bauth:{}:{}::", room, session_id),
            Outbound::Login {
                name,
                password: Some(password),
            } => format!("blogin:{}:{}", name, password),
            Outbound::Login { name, password: None } => format!("blogin:{}", name),
            Outbound::GetParticipants => "gparticipants".to_string(),
            Outbound::EnableBackground => "msgbg:1".to_string(),
            Outbound::Message { nonce, body } => format!("bm:{}:0:{}", nonce, body),
            Outbound::DeleteMessage { message_id } => format!("delmsg:{}", message_id),
            Outbound::DeleteAll {
                unique_id,
                ip,
                name,
            } => format!("delallmsg:{}:{}:{}", unique_id, ip, name),
            Outbound::Block {
                unique_id,
                ip,
                name,
            } => format!("block:{}:{}:{}", unique_id, ip, name),
            Outbound::RemoveBlock { unique_id, ip } => format!("removeblock:{}:{}", unique_id, ip),
        }
    }

    /// Name used in logs; never includes arguments (passwords)
    pub fn name(&self) -> &'static str {
        match self {
            Outbound::Auth { .. } => "bauth",
            Outbound::Login { .. } => "blogin",
            Outbound::GetParticipants => "gparticipants",
            Outbound::EnableBackground => "msgbg",
            Outbound::Message { .. } => "bm",
            Outbound::DeleteMessage { .. } => "delmsg",
            Outbound::DeleteAll { .. } => "delallmsg",
            Outbound::Block { .. } => "block",
            Outbound::RemoveBlock { .. } => "removeblock",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pong_is_ignored() {
        assert_eq!(Command::parse("").unwrap(), None);
        assert_eq!(Command::parse(":anything").unwrap(), None);
    }

    #[test]
    fn test_parse_ok() {
        let cmd = Command::parse("ok:owner1:sess123:N:myname:169900:1.2.3.4::server9")
            .unwrap()
            .unwrap();
        match cmd {
            Command::Ok(ack) => {
                assert_eq!(ack.owner, "owner1");
                assert_eq!(ack.session_id, "sess123");
                assert_eq!(ack.session_status, "N");
                assert_eq!(ack.server_time, "169900");
                assert_eq!(ack.moderators, "");
                assert_eq!(ack.server_id, "server9");
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_missing_fields_are_empty() {
        match Command::parse("u:42").unwrap().unwrap() {
            Command::MessageId { pending_id, final_id } => {
                assert_eq!(pending_id, "42");
                assert_eq!(final_id, "");
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_message_body_keeps_colons() {
        let frame = "b:1699000000.1:bob::14396270:ABCD:7:1.2.3.4:0::<n000/>time: 12:30";
        match Command::parse(frame).unwrap().unwrap() {
            Command::Message(content) => {
                assert_eq!(content.name, "bob");
                assert_eq!(content.temp_name, "");
                assert_eq!(content.pending_id, "7");
                assert_eq!(content.raw, "<n000/>time: 12:30");
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_participants_and_deleteall() {
        match Command::parse("gparticipants:3:c1:1699.5:111:bob:None:0;c2:1700.1:222:None:None:0")
            .unwrap()
            .unwrap()
        {
            Command::Participants {
                unregistered_count,
                records,
            } => {
                assert_eq!(unregistered_count, "3");
                assert_eq!(records, "c1:1699.5:111:bob:None:0;c2:1700.1:222:None:None:0");
            }
            _ => panic!("Wrong variant"),
        }

        assert_eq!(
            Command::parse("deleteall:a:b:c").unwrap(),
            Some(Command::DeleteAll {
                message_ids: vec!["a".into(), "b".into(), "c".into()]
            })
        );
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            Command::parse("frobnicate:1"),
            Err(ProtocolError::UnknownCommand("frobnicate".into()))
        );
    }

    #[test]
    fn test_name_matches_wire() {
        for frame in ["inited", "pwdok", "show_tb:30", "tb:10", "nlptb", "blocked:a:b:c:d:e"] {
            let cmd = Command::parse(frame).unwrap().unwrap();
            assert_eq!(cmd.name(), frame.split(':').next().unwrap());
        }
    }

    #[test]
    fn test_outbound_frames() {
        assert_eq!(
            Outbound::Auth {
                room: "khouwe".into(),
                session_id: "1234".into()
            }
            .to_frame(),
            "bauth:khouwe:1234::"
        );
        assert_eq!(
            Outbound::Login {
                name: "bob".into(),
                password: None
            }
            .to_frame(),
            "blogin:bob"
        );
        assert_eq!(
            Outbound::Login {
                name: "bob".into(),
                password: Some("pw".into())
            }
            .to_frame(),
            "blogin:bob:pw"
        );
        assert_eq!(Outbound::EnableBackground.to_frame(), "msgbg:1");
        assert_eq!(
            Outbound::Message {
                nonce: "ab12".into(),
                body: "hi".into()
            }
            .to_frame(),
            "bm:ab12:0:hi"
        );
        assert_eq!(
            Outbound::RemoveBlock {
                unique_id: "U".into(),
                ip: "1.2.3.4".into()
            }
            .to_frame(),
            "removeblock:U:1.2.3.4"
        );
    }
}
